//! Shared Utilities
//!
//! Error handling, security helpers, and input validation.

pub mod error;
pub mod security;
pub mod validation;
