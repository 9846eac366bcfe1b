//! Backend integration tests
//!
//! Subprocess and remote providers wired into a running gateway.

mod scenario;
mod subprocess;
