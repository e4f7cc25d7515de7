//! API Routes
//!
//! Route handlers organized by functionality.

pub mod bootstrap;
pub mod devices;
pub mod health;
pub mod ingest;
