//! Foundation module - Core utilities and types
//!
//! - Math types and transform composition
//! - Logging setup

pub mod math;
pub mod logging;
