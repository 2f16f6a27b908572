//! GPU buffer with owned backing memory
//!
//! Memory is allocated from the first type matching the requested property
//! flags and bound before the buffer is handed out. Host-visible buffers can
//! be written and read directly; device-local ones are filled through
//! [`Device::upload_buffer`](crate::render::backends::vulkan::Device::upload_buffer).

use ash::vk;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// Buffer wrapper with RAII cleanup
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    descriptor: vk::DescriptorBufferInfo,
    // every host access to `memory` goes through this lock
    mapping: Mutex<HostMapping>,
}

/// Host address of a persistent mapping, null while unmapped
struct HostMapping(*mut u8);

// SAFETY: the pointer is only dereferenced with the owning buffer's mapping
// lock held or through `&mut Buffer`.
unsafe impl Send for HostMapping {}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    ///
    /// When `data` is given the memory must be host-visible; the bytes are
    /// copied in (and flushed for non-coherent memory) before returning.
    pub fn new(
        device: &Arc<Device>,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        size: vk::DeviceSize,
        data: Option<&[u8]>,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot create a zero-sized buffer".to_string(),
            });
        }
        if let Some(data) = data {
            if data.len() as vk::DeviceSize > size {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("{} bytes of initial data exceed buffer size {size}", data.len()),
                });
            }
            if !memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
                return Err(VulkanError::InvalidOperation {
                    reason: "initial data requires host-visible memory; stage it with upload_buffer".to_string(),
                });
            }
        }

        let raw = device.handle();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            raw.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let memory_type = match device.find_memory_type(requirements.memory_type_bits, memory_flags) {
            Ok(index) => index,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match unsafe { raw.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        if let Err(e) = unsafe { raw.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                raw.destroy_buffer(buffer, None);
                raw.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }

        let mut created = Self {
            device: Arc::clone(device),
            buffer,
            memory,
            size,
            alignment: requirements.alignment,
            usage,
            memory_flags,
            descriptor: vk::DescriptorBufferInfo::default(),
            mapping: Mutex::new(HostMapping(std::ptr::null_mut())),
        };
        created.setup_descriptor(vk::WHOLE_SIZE, 0);

        if let Some(data) = data {
            created.write_bytes(0, data)?;
        }

        Ok(created)
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Backing memory
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Size requested at creation
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Alignment reported by the driver
    pub fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }

    /// Usage flags
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory property flags requested at creation
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    /// Set the range used by [`Buffer::descriptor`]
    pub fn setup_descriptor(&mut self, size: vk::DeviceSize, offset: vk::DeviceSize) {
        self.descriptor = vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        };
    }

    /// Descriptor info for writing this buffer into a descriptor set
    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        self.descriptor
    }

    fn ensure_host_visible(&self) -> VulkanResult<()> {
        if self.memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: "buffer memory is not host-visible".to_string(),
            })
        }
    }

    fn ensure_range(&self, offset: vk::DeviceSize, len: usize) -> VulkanResult<()> {
        let end = offset.checked_add(len as vk::DeviceSize);
        if end.map_or(true, |end| end > self.size) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("range {offset}+{len} exceeds buffer size {}", self.size),
            });
        }
        Ok(())
    }

    fn is_coherent(&self) -> bool {
        self.memory_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    fn range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> vk::MappedMemoryRange {
        vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(offset)
            .size(size)
            .build()
    }

    fn lock_mapping(&self) -> MutexGuard<'_, HostMapping> {
        // the guarded state is a plain pointer, so a poisoned lock is still usable
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mapping_mut(&mut self) -> &mut HostMapping {
        self.mapping.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether [`Buffer::map`] is currently in effect
    pub fn is_mapped(&self) -> bool {
        !self.lock_mapping().0.is_null()
    }

    /// Map the whole buffer and keep it mapped until [`Buffer::unmap`]
    ///
    /// Mapping an already mapped buffer returns the existing mapping.
    pub fn map(&mut self) -> VulkanResult<&mut [u8]> {
        self.ensure_host_visible()?;

        let mut ptr = self.mapping_mut().0;
        if ptr.is_null() {
            ptr = unsafe {
                self.device
                    .handle()
                    .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                    .map_err(VulkanError::Api)?
                    .cast::<u8>()
            };
            self.mapping_mut().0 = ptr;
        }

        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.size as usize) })
    }

    /// Release a mapping created by [`Buffer::map`]
    pub fn unmap(&mut self) {
        let ptr = std::mem::replace(&mut self.mapping_mut().0, std::ptr::null_mut());
        if !ptr.is_null() {
            unsafe { self.device.handle().unmap_memory(self.memory) };
        }
    }

    /// Make host writes in a mapped range visible to the device
    ///
    /// No-op for coherent memory. `offset` and `size` must respect the
    /// device's non-coherent atom size; `vk::WHOLE_SIZE` covers the rest.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        if self.is_coherent() {
            return Ok(());
        }
        let mapping = self.lock_mapping();
        Self::ensure_mapped(&mapping)?;
        unsafe {
            self.device
                .handle()
                .flush_mapped_memory_ranges(&[self.range(offset, size)])
                .map_err(VulkanError::Api)
        }
    }

    /// Make device writes in a mapped range visible to the host
    pub fn invalidate(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        if self.is_coherent() {
            return Ok(());
        }
        let mapping = self.lock_mapping();
        Self::ensure_mapped(&mapping)?;
        unsafe {
            self.device
                .handle()
                .invalidate_mapped_memory_ranges(&[self.range(offset, size)])
                .map_err(VulkanError::Api)
        }
    }

    fn ensure_mapped(mapping: &HostMapping) -> VulkanResult<()> {
        if mapping.0.is_null() {
            Err(VulkanError::InvalidOperation {
                reason: "buffer is not mapped".to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Run `f` over a host pointer to the start of the buffer
    ///
    /// Holds the mapping lock for the whole call. Reuses a persistent mapping
    /// when there is one, otherwise maps for the duration of the call.
    fn with_mapping<R>(&self, f: impl FnOnce(*mut u8) -> VulkanResult<R>) -> VulkanResult<R> {
        self.ensure_host_visible()?;

        let mapping = self.lock_mapping();
        if !mapping.0.is_null() {
            return f(mapping.0);
        }

        let raw = self.device.handle();
        let ptr = unsafe {
            raw.map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
                .cast::<u8>()
        };
        let result = f(ptr);
        unsafe { raw.unmap_memory(self.memory) };
        drop(mapping);
        result
    }

    /// Copy `data` into the buffer at `offset`
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.ensure_host_visible()?;
        self.ensure_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        self.with_mapping(|ptr| unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
            if self.is_coherent() {
                Ok(())
            } else {
                self.device
                    .handle()
                    .flush_mapped_memory_ranges(&[self.range(0, vk::WHOLE_SIZE)])
                    .map_err(VulkanError::Api)
            }
        })
    }

    /// Copy a slice of plain-old-data values into the buffer at `offset`
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, values: &[T]) -> VulkanResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(values))
    }

    /// Read the whole buffer back to the host
    pub fn read_bytes(&self) -> VulkanResult<Vec<u8>> {
        self.with_mapping(|ptr| unsafe {
            if !self.is_coherent() {
                self.device
                    .handle()
                    .invalidate_mapped_memory_ranges(&[self.range(0, vk::WHOLE_SIZE)])
                    .map_err(VulkanError::Api)?;
            }
            Ok(std::slice::from_raw_parts(ptr, self.size as usize).to_vec())
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
            self.device.handle().free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_can_be_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
        assert_send_sync::<Arc<Buffer>>();
    }
}
