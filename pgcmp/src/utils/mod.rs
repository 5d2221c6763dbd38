//! Utilities for pgcmp
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod normalize;

// Re-export key utility functions
pub use normalize::{
    normalize_constraint_definition, normalize_default, normalize_expression, normalize_optional,
    normalize_type_name, split_statements,
};
