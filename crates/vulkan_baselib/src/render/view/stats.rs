//! Frame loop counters

use serde::Serialize;

/// Counters kept by [`View`](super::View)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Full device-idle waits
    pub device_idle_waits: u64,
    /// Current swapchain generation
    pub swapchain_generation: u64,
    /// Times the framebuffers were rebuilt
    pub framebuffer_builds: u64,
    /// Command buffers recorded, counted individually
    pub command_buffer_recordings: u64,
    /// Frames submitted and presented
    pub frames_presented: u64,
    /// Acquire or present calls that returned `SUBOPTIMAL_KHR`
    pub suboptimal_results: u64,
}
