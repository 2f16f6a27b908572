//! Vulkan backend
//!
//! Organized into initialization (instance, surface, device), resources
//! (buffers, images, textures), rendering (render pass, commands, shaders,
//! pipelines) and state (synchronization, framebuffers, swapchain).

/// Instance, surface and logical device
pub mod initialization;

/// GPU resources with owned memory
pub mod resources;

/// Render passes, command recording, shaders and pipelines
pub mod rendering;

/// Synchronization, framebuffers and the swapchain
pub mod state;

pub use initialization::context::{VulkanError, VulkanInstance, VulkanResult};
pub use initialization::device::{
    has_stencil_component, memory_type_index, resolve_queue_family, select_depth_format, Device,
    DeviceCapabilities, QueueFamilyIndices, DEPTH_FORMAT_CANDIDATES,
};
pub use initialization::surface::Surface;

pub use resources::buffer::Buffer;
pub use resources::image::{Image, ImageDesc};
pub use resources::texture::{Texture, TextureError};

pub use rendering::commands::{flipped_viewport, full_scissor, ActiveRenderPass, CommandBuffers, CommandRecorder};
pub use rendering::pipeline::{DescriptorSetLayout, GraphicsPipelineDesc, Pipeline, PipelineLayout};
pub use rendering::render_pass::RenderPass;
pub use rendering::shader::{ShaderModule, SHADER_ENTRY_POINT};

pub use state::framebuffer::Framebuffer;
pub use state::swapchain::{SwapChain, SwapChainState};
pub use state::sync::{Fence, Semaphore};
