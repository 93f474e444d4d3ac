//! Database layer for searchmon
//!
//! SQLite storage for the daily aggregate cache:
//! - Schema migrations
//! - One row per (site, segment, day), one column group per metric family

pub mod repo;
pub mod schema;

pub use repo::Database;
