//! gRPC utilities for printfleet services.
//!
//! This module provides shared gRPC infrastructure:
//! - Error conversion between `AppError` and `tonic::Status`
//! - Auth-context extraction and capability plumbing (BFF trust model)

pub mod capability_checker;
pub mod error;

pub use capability_checker::{AuthContext, CapabilityChecker};
pub use error::{GrpcResult, IntoStatus};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
