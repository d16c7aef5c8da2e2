//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `auth`: Shared-secret token validation
//! - `config`: Application configuration and settings
//! - `error`: Unified error types
//! - `metrics`: Prometheus metrics helpers

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
