//! Unit tests for individual components

mod auth_test;
mod builders_test;
mod config_test;
mod error_test;
mod util_test;
