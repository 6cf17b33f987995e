//! Shared document store test infrastructure
//!
//! The same test functions run against every backend:
//!
//! - **Memory**: always compiled
//! - **SQLite**: in-memory databases with the real migrations, behind `database-sqlite`
//!
//! Each test takes `&dyn DocumentStore`, so a new backend only needs a
//! setup function and a test macro.
