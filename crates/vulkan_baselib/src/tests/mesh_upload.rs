//! Procedural meshes, materials and instance layouts on a real device

use ash::vk;
use std::sync::Arc;

use super::support::headless_device;
use crate::render::backends::vulkan::{DescriptorSetLayout, PipelineLayout};
use crate::render::primitives::mesh_instance::MODEL_PUSH_CONSTANT_SIZE;
use crate::render::primitives::{material_set_bindings, Material, MeshInstance, PbrFactors, Sphere};

#[test]
fn test_sphere_uploads_as_strip() {
    let Some((_instance, device)) = headless_device() else { return };

    let sphere = Sphere::new(16, 8);
    let primitive = sphere.to_primitive(&device).unwrap();

    assert_eq!(primitive.topology(), vk::PrimitiveTopology::TRIANGLE_STRIP);
    assert_eq!(primitive.attribute_count(), 3);
    assert_eq!(primitive.vertex_count(), 17 * 9);
    assert_eq!(primitive.index_count(), 17 * 8 * 2);
    assert_eq!(primitive.index_type(), Some(vk::IndexType::UINT16));
}

#[test]
fn test_instance_pushes_model_matrix_when_layout_has_room() {
    let Some((_instance, device)) = headless_device() else { return };

    let material_layout = DescriptorSetLayout::new(&device, &material_set_bindings()).unwrap();
    let push = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: MODEL_PUSH_CONSTANT_SIZE,
    };
    let layout = PipelineLayout::new(&device, &[material_layout.handle(), material_layout.handle()], &[push]).unwrap();

    let mut instance = MeshInstance::new(&device);
    instance.add_primitive(Sphere::new(8, 4).to_primitive(&device).unwrap());
    instance.set_pipeline_layout(layout);

    assert_eq!(instance.push_constant_stages(), vk::ShaderStageFlags::VERTEX);
    assert_eq!(instance.index_count(), 9 * 4 * 2);
}

#[test]
fn test_material_bind_allocates_a_set() {
    let Some((_instance, device)) = headless_device() else { return };

    let layout = DescriptorSetLayout::new(&device, &material_set_bindings()).unwrap();
    let mut material = Material::new(PbrFactors::default());
    assert!(material.descriptor_set().is_none());

    material.bind(&device, layout.handle()).unwrap();
    assert!(material.descriptor_set().is_some());
    assert_eq!(material.uniform_factors().textured, 0);

    let shared = Arc::new(material);
    assert_eq!(shared.cull_mode(), vk::CullModeFlags::BACK);
}
