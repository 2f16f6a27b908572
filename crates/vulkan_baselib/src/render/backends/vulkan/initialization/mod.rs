// Instance, surface and device setup

pub mod context;
pub mod device;
pub mod surface;

pub use context::*;
pub use device::*;
pub use surface::*;
