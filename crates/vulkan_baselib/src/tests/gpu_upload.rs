//! Staging uploads and host readback

use ash::vk;

use super::support::headless_device;
use crate::render::backends::vulkan::VulkanError;

const HOST: vk::MemoryPropertyFlags =
    vk::MemoryPropertyFlags::from_raw(vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw());

#[test]
fn test_vertex_upload_reads_back_in_order() {
    let Some((_instance, device)) = headless_device() else { return };

    let vertices: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let bytes: &[u8] = bytemuck::cast_slice(&vertices);

    let local = device
        .upload_buffer(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC, bytes)
        .unwrap();
    assert!(local.memory_flags().contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));

    let readback = device
        .create_buffer(vk::BufferUsageFlags::TRANSFER_DST, HOST, bytes.len() as vk::DeviceSize, None)
        .unwrap();
    device.copy_buffer(&local, &readback, None).unwrap();

    let read = readback.read_bytes().unwrap();
    assert_eq!(&read[..bytes.len()], bytes);

    let values: Vec<[f32; 3]> = bytemuck::pod_collect_to_vec(&read[..bytes.len()]);
    assert_eq!(values, vertices.to_vec());
}

#[test]
fn test_host_buffer_round_trip() {
    let Some((_instance, device)) = headless_device() else { return };

    let data: Vec<u8> = (0..=255).collect();
    let buffer = device
        .create_buffer(vk::BufferUsageFlags::UNIFORM_BUFFER, HOST, data.len() as vk::DeviceSize, Some(&data))
        .unwrap();
    assert_eq!(buffer.read_bytes().unwrap(), data);
}

#[test]
fn test_initial_data_needs_host_visible_memory() {
    let Some((_instance, device)) = headless_device() else { return };

    let result = device.create_buffer(
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        16,
        Some(&[0u8; 16]),
    );
    assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
}

#[test]
fn test_device_memory_types_satisfy_requests() {
    let Some((_instance, device)) = headless_device() else { return };

    let properties = &device.capabilities().memory_properties;
    for bits in [0b1u32, 0b11, u32::MAX] {
        match device.memory_type_index(bits, HOST) {
            Some(i) => {
                assert_ne!(bits & (1 << i), 0);
                assert!(properties.memory_types[i as usize].property_flags.contains(HOST));
            }
            None => {
                let found = (0..properties.memory_type_count).any(|i| {
                    bits & (1 << i) != 0 && properties.memory_types[i as usize].property_flags.contains(HOST)
                });
                assert!(!found);
            }
        }
    }
}

#[test]
fn test_persistent_mapping_is_shared_with_writes() {
    let Some((_instance, device)) = headless_device() else { return };

    let mut buffer = device
        .create_buffer(vk::BufferUsageFlags::UNIFORM_BUFFER, HOST, 64, None)
        .unwrap();
    assert!(!buffer.is_mapped());

    buffer.map().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
    assert!(buffer.is_mapped());
    buffer.flush(0, vk::WHOLE_SIZE).unwrap();

    // writes and reads go through the existing mapping
    buffer.write_bytes(4, &[5, 6]).unwrap();
    assert_eq!(&buffer.read_bytes().unwrap()[..6], &[1, 2, 3, 4, 5, 6]);

    buffer.unmap();
    assert!(!buffer.is_mapped());
    assert_eq!(&buffer.read_bytes().unwrap()[..6], &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_shared_buffer_writes_from_threads() {
    let Some((_instance, device)) = headless_device() else { return };

    const SLOT: usize = 16;
    const THREADS: usize = 4;
    let buffer = std::sync::Arc::new(
        device
            .create_buffer(vk::BufferUsageFlags::UNIFORM_BUFFER, HOST, (SLOT * THREADS) as vk::DeviceSize, None)
            .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let buffer = std::sync::Arc::clone(&buffer);
            std::thread::spawn(move || {
                for round in 0..50u8 {
                    let fill = [t as u8 ^ round; SLOT];
                    buffer.write_bytes((t * SLOT) as vk::DeviceSize, &fill).unwrap();
                    buffer.read_bytes().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let bytes = buffer.read_bytes().unwrap();
    for t in 0..THREADS {
        assert!(bytes[t * SLOT..(t + 1) * SLOT].iter().all(|&b| b == t as u8 ^ 49));
    }
}

#[test]
fn test_out_of_range_writes_are_rejected() {
    let Some((_instance, device)) = headless_device() else { return };

    let buffer = device
        .create_buffer(vk::BufferUsageFlags::UNIFORM_BUFFER, HOST, 16, None)
        .unwrap();
    assert!(matches!(
        buffer.write_bytes(u64::MAX - 1, &[0; 4]),
        Err(VulkanError::InvalidOperation { .. })
    ));

    let other = device
        .create_buffer(vk::BufferUsageFlags::TRANSFER_DST, HOST, 16, None)
        .unwrap();
    let region = vk::BufferCopy { src_offset: u64::MAX - 1, dst_offset: 0, size: 4 };
    assert!(matches!(
        device.copy_buffer(&buffer, &other, Some(region)),
        Err(VulkanError::InvalidOperation { .. })
    ));
}
