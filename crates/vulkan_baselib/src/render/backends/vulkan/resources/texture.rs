//! Sampled 2D textures
//!
//! A [`Texture`] starts unrealized: it has no image, view or sampler until
//! pixel data is loaded. Loading stages the pixels in a host-visible buffer,
//! copies them into a device-local image and leaves it in
//! `SHADER_READ_ONLY_OPTIMAL`.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::image::{Image, ImageDesc};
use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// Format used for RGBA8 texture uploads
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Texture errors
#[derive(thiserror::Error, Debug)]
pub enum TextureError {
    /// Reading the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoded image could not be decoded
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    /// Uploading to the GPU failed
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Sampled texture with RAII cleanup
pub struct Texture {
    device: Arc<Device>,
    image: Option<Image>,
    sampler: vk::Sampler,
}

impl Texture {
    /// Create an unrealized texture
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            image: None,
            sampler: vk::Sampler::null(),
        }
    }

    /// Whether pixel data has been uploaded
    pub fn is_realized(&self) -> bool {
        self.image.is_some()
    }

    /// Image view, once realized
    pub fn image_view(&self) -> Option<vk::ImageView> {
        self.image.as_ref().map(Image::view)
    }

    /// Sampler, once realized
    pub fn sampler(&self) -> Option<vk::Sampler> {
        (self.sampler != vk::Sampler::null()).then_some(self.sampler)
    }

    /// Texture size, once realized
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.image.as_ref().map(Image::extent)
    }

    /// Current layout; `UNDEFINED` while unrealized
    pub fn layout(&self) -> vk::ImageLayout {
        self.image.as_ref().map_or(vk::ImageLayout::UNDEFINED, Image::layout)
    }

    /// Combined image/sampler descriptor, once realized
    pub fn descriptor(&self) -> Option<vk::DescriptorImageInfo> {
        let image = self.image.as_ref()?;
        Some(vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: image.view(),
            image_layout: image.layout(),
        })
    }

    /// Upload tightly packed RGBA8 pixels, replacing any previous contents
    pub fn load_data(&mut self, width: u32, height: u32, rgba: &[u8]) -> VulkanResult<()> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{width}x{height} RGBA texture needs {expected} bytes, got {}", rgba.len()),
            });
        }

        let staging = self.device.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            rgba.len() as vk::DeviceSize,
            Some(rgba),
        )?;

        let extent = vk::Extent2D { width, height };
        let mut image = Image::new(&self.device, ImageDesc::sampled_color(extent, TEXTURE_FORMAT))?;

        let mut recorded = Ok(());
        self.device.submit_one_shot(self.device.graphics_queue(), |cmd| {
            image.transition_layout(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            recorded = image.copy_from_buffer(cmd, staging.handle());
            image.transition_layout(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        })?;
        recorded?;

        if self.sampler == vk::Sampler::null() {
            self.sampler = self.create_sampler()?;
        }
        self.image = Some(image);

        log::debug!("Uploaded {width}x{height} texture");
        Ok(())
    }

    /// Decode an encoded image (PNG or JPEG) and upload it
    pub fn load_encoded(&mut self, bytes: &[u8]) -> Result<(), TextureError> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        self.load_data(width, height, decoded.as_raw())?;
        Ok(())
    }

    /// Read, decode and upload an image file
    pub fn load_image(&mut self, path: impl AsRef<Path>) -> Result<(), TextureError> {
        let bytes = std::fs::read(path.as_ref())?;
        self.load_encoded(&bytes)
    }

    fn create_sampler(&self) -> VulkanResult<vk::Sampler> {
        let anisotropy = self.device.enabled_features().sampler_anisotropy == vk::TRUE;
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { 16.0_f32.min(self.device.capabilities().properties.limits.max_sampler_anisotropy) } else { 1.0 })
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        unsafe {
            self.device.handle().create_sampler(&sampler_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.sampler != vk::Sampler::null() {
            unsafe {
                self.device.handle().destroy_sampler(self.sampler, None);
            }
        }
    }
}
