//! Integration tests for sqldesk.

pub mod coordinator_test;
pub mod postgres_test;
pub mod sqlite_test;
