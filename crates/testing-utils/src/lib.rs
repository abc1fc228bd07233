//! # Validator Testing Utils
//!
//! Shared testing utilities for the validation orchestration workspace:
//! scriptable mock engines, an in-memory revalidation store, test data
//! builders and polling helpers.
//!
//! ```toml
//! [dev-dependencies]
//! validator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
