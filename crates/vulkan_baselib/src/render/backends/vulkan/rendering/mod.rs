// Vulkan rendering components

pub mod commands;
pub mod pipeline;
pub mod render_pass;
pub mod shader;

pub use commands::*;
pub use pipeline::*;
pub use render_pass::*;
pub use shader::*;
