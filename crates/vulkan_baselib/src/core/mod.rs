//! # Core Module
//!
//! Shared configuration types used by every layer of the crate.

pub mod config;

pub use config::{
    BaselibConfig,
    CameraHome,
    Config,
    ConfigError,
    DeviceConfig,
    InstanceConfig,
    QueueRequest,
    ViewConfig,
};
