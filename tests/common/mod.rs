//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Seeding helpers for organizations, identities and memberships
//! - Test database setup
//! - API test client

pub mod fixtures;

pub use fixtures::*;
pub use test_app::*;
