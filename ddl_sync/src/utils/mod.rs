//! Utilities for ddl_sync
//!
//! This module provides utility functions used across the library.

pub mod logging;
pub mod naming;

pub use naming::{
    escape_identifier, get_constraint_name, normalize_identifier, parse_time_key,
    unique_constraint_name,
};
