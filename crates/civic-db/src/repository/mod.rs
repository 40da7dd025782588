//! # Repository Module
//!
//! SQL lives here and nowhere else.
//!
//! ## Available Repositories
//!
//! - [`ErrorLogRepository`](error_log::ErrorLogRepository) - Persisted error log suffix

pub mod error_log;
