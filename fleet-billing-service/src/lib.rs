//! Fleet Billing Service - Meter reconciliation and invoice generation for printer fleets.

pub mod billing;
pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
