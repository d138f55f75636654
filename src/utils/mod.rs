//! Environment variable helpers.

pub mod env;
