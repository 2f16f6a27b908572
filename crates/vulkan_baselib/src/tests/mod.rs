//! Tests that need a Vulkan driver
//!
//! Each test creates its own headless instance and device and returns early
//! with a warning when no driver is available.

mod support;

mod gpu_upload;
mod mesh_upload;
mod view_lifecycle;
