//! sqldesk - a saved-connection SQL client with a cancellable query
//! execution core.
//!
//! This library exposes the core modules for use by the binary and the
//! integration tests.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
pub mod query;
