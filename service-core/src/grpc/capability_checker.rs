//! Shared capability plumbing for printfleet services.
//!
//! Services run behind the console BFF, which authenticates the operator and
//! enforces capabilities before a request ever reaches a backend. The
//! backend's job is to extract the trusted identity headers the BFF forwards
//! (`x-user-id`, `x-tenant-id`) and refuse requests that arrive without a
//! tenant context, so no query can run unscoped.

use tonic::{Request, Status};

/// Authentication context resolved for a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub tenant_id: String,
}

/// Resolves the auth context from trusted BFF metadata and records the
/// capability each handler requires.
#[derive(Clone, Default)]
pub struct CapabilityChecker;

impl CapabilityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the auth context for the given request.
    ///
    /// The capability key names what the handler requires; the BFF has
    /// already enforced it, so here it is recorded for audit logging only.
    /// Requests without a tenant context are rejected.
    #[allow(clippy::result_large_err)]
    pub async fn require_capability<T>(
        &self,
        request: &Request<T>,
        capability: &str,
    ) -> Result<AuthContext, Status> {
        let context = extract_auth_context_from_headers(request);

        if context.tenant_id.is_empty() {
            tracing::warn!(capability = capability, "Request without tenant context");
            return Err(Status::unauthenticated("Missing tenant context"));
        }

        tracing::debug!(
            user_id = %context.user_id,
            tenant_id = %context.tenant_id,
            capability = capability,
            "Capability resolved via BFF trust"
        );

        Ok(context)
    }
}

/// Extract the auth context from BFF trust headers.
fn extract_auth_context_from_headers<T>(request: &Request<T>) -> AuthContext {
    let user_id = request
        .metadata()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("system")
        .to_string();

    let tenant_id = request
        .metadata()
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    AuthContext { user_id, tenant_id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_without_tenant_is_rejected() {
        let checker = CapabilityChecker::new();
        let request: Request<()> = Request::new(());

        let result = checker.require_capability(&request, "some:capability").await;
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().code(),
            tonic::Code::Unauthenticated
        );
    }

    #[tokio::test]
    async fn auth_context_comes_from_trusted_headers() {
        let checker = CapabilityChecker::new();

        let mut request: Request<()> = Request::new(());
        request
            .metadata_mut()
            .insert("x-user-id", "user-123".parse().unwrap());
        request
            .metadata_mut()
            .insert("x-tenant-id", "tenant-456".parse().unwrap());

        let context = checker
            .require_capability(&request, "some:capability")
            .await
            .unwrap();
        assert_eq!(context.user_id, "user-123");
        assert_eq!(context.tenant_id, "tenant-456");
    }

    #[tokio::test]
    async fn user_defaults_to_system_when_absent() {
        let checker = CapabilityChecker::new();

        let mut request: Request<()> = Request::new(());
        request
            .metadata_mut()
            .insert("x-tenant-id", "tenant-456".parse().unwrap());

        let context = checker
            .require_capability(&request, "some:capability")
            .await
            .unwrap();
        assert_eq!(context.user_id, "system");
    }
}
