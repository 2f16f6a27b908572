//! glTF document to GPU mesh conversion

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::accessor::{self, read_accessor, AccessorData};
use super::document::{GltfDocument, MaterialDef, NodeDef, PrimitiveDef};
use super::GltfError;
use crate::foundation::math::{y_up_to_z_up, Mat4, Quat, Quaternion, Transform, Vec3};
use crate::render::backends::vulkan::{Device, Texture, TextureError};
use crate::render::primitives::{attribute_location, Material, MeshInstance, MeshPrimitive, PbrFactors};

/// Result of loading a glTF asset
pub struct LoadedModel {
    /// One primitive per mesh primitive per node, in traversal order
    pub instance: MeshInstance,
    /// Materials in document order
    pub materials: Vec<Arc<Material>>,
}

/// Vertex stream of a [`PrimitivePlan`]
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAttribute {
    /// Shader location from the attribute name
    pub location: u32,
    /// Vertex format of one element
    pub format: vk::Format,
    /// Packed element data
    pub data: AccessorData,
}

/// A mesh primitive checked against its document and ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitivePlan {
    /// Mesh the primitive belongs to
    pub mesh: usize,
    /// Position within the mesh
    pub primitive: usize,
    /// World matrix, axis correction included
    pub matrix: Mat4,
    /// Topology from the primitive mode
    pub topology: vk::PrimitiveTopology,
    /// Index type from the index accessor
    pub index_type: vk::IndexType,
    /// Packed index data
    pub indices: AccessorData,
    /// Vertex streams ordered by location
    pub attributes: Vec<PlannedAttribute>,
    /// Material index, when the primitive names one
    pub material: Option<usize>,
}

/// Loads glTF assets into GPU meshes
///
/// Unsupported primitives are dropped with a warning and the rest of the
/// asset still loads. GPU failures abort the load.
pub struct GltfLoader;

impl GltfLoader {
    /// Load a `.gltf` or `.glb` file without binding material descriptor sets
    pub fn load_file(device: &Arc<Device>, path: impl AsRef<Path>) -> Result<LoadedModel, GltfError> {
        let doc = GltfDocument::load(path)?;
        Self::load_document(device, &doc, None)
    }

    /// Load a file and bind every material against `material_layout`
    pub fn load_file_with_layout(
        device: &Arc<Device>,
        path: impl AsRef<Path>,
        material_layout: vk::DescriptorSetLayout,
    ) -> Result<LoadedModel, GltfError> {
        let doc = GltfDocument::load(path)?;
        Self::load_document(device, &doc, Some(material_layout))
    }

    /// Build materials and meshes from a parsed document
    pub fn load_document(
        device: &Arc<Device>,
        doc: &GltfDocument,
        material_layout: Option<vk::DescriptorSetLayout>,
    ) -> Result<LoadedModel, GltfError> {
        let plans = Self::plan(doc)?;

        let materials = doc
            .root()
            .materials
            .iter()
            .enumerate()
            .map(|(index, def)| Self::create_material(device, doc, index, def, material_layout).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let mut instance = MeshInstance::new(device);
        for plan in &plans {
            instance.add_primitive(Self::upload_primitive(device, plan, &materials)?);
        }

        log::info!(
            "Loaded glTF: {} primitives, {} materials, {} indices",
            instance.primitives().len(),
            materials.len(),
            instance.index_count()
        );
        Ok(LoadedModel { instance, materials })
    }

    /// Walk the node hierarchy and validate every primitive without a device
    ///
    /// Unsupported or malformed primitives are dropped with a warning. A
    /// broken hierarchy (missing node or mesh, cycle) fails the whole plan.
    pub fn plan(doc: &GltfDocument) -> Result<Vec<PrimitivePlan>, GltfError> {
        let mut plans = Vec::new();
        let root_matrix = y_up_to_z_up();
        for node in root_nodes(doc) {
            Self::visit_node(doc, node, &root_matrix, &mut plans, 0)?;
        }
        Ok(plans)
    }

    fn create_material(
        device: &Arc<Device>,
        doc: &GltfDocument,
        index: usize,
        def: &MaterialDef,
        layout: Option<vk::DescriptorSetLayout>,
    ) -> Result<Material, GltfError> {
        let pbr = &def.pbr_metallic_roughness;
        let factors = PbrFactors {
            ao: 1.0,
            metallic: pbr.metallic_factor,
            roughness: pbr.roughness_factor,
            albedo: pbr.base_color_factor,
            ..PbrFactors::default()
        };
        let mut material = Material::new(factors).with_cull(!def.double_sided);

        if let Some(texture_ref) = &pbr.base_color_texture {
            match Self::load_texture(device, doc, texture_ref.index) {
                Ok(texture) => material = material.with_texture(Arc::new(texture)),
                Err(GltfError::Vulkan(e) | GltfError::Texture(TextureError::Vulkan(e))) => return Err(e.into()),
                Err(e) => log::warn!("Material {index}: base colour texture skipped: {e}"),
            }
        }

        if let Some(layout) = layout {
            material.bind(device, layout)?;
        }
        Ok(material)
    }

    fn load_texture(device: &Arc<Device>, doc: &GltfDocument, texture_index: usize) -> Result<Texture, GltfError> {
        let image = doc.texture_source(texture_index)?;
        let bytes = doc.image_bytes(image)?;
        let mut texture = Texture::new(device);
        texture.load_encoded(&bytes)?;
        Ok(texture)
    }

    fn visit_node(
        doc: &GltfDocument,
        index: usize,
        parent: &Mat4,
        plans: &mut Vec<PrimitivePlan>,
        depth: usize,
    ) -> Result<(), GltfError> {
        let nodes = &doc.root().nodes;
        if depth > nodes.len() {
            return Err(GltfError::Malformed("node hierarchy contains a cycle".to_string()));
        }
        let node = nodes
            .get(index)
            .ok_or_else(|| GltfError::Malformed(format!("node {index} does not exist")))?;
        let world = parent * node_matrix(node);

        if let Some(mesh_index) = node.mesh {
            let mesh = doc
                .root()
                .meshes
                .get(mesh_index)
                .ok_or_else(|| GltfError::Malformed(format!("mesh {mesh_index} does not exist")))?;

            for (prim_index, def) in mesh.primitives.iter().enumerate() {
                match Self::plan_primitive(doc, def, mesh_index, prim_index, world) {
                    Ok(plan) => plans.push(plan),
                    Err(e) => log::warn!("Mesh {mesh_index} primitive {prim_index} dropped: {e}"),
                }
            }
        }

        for &child in &node.children {
            Self::visit_node(doc, child, &world, plans, depth + 1)?;
        }
        Ok(())
    }

    fn plan_primitive(
        doc: &GltfDocument,
        def: &PrimitiveDef,
        mesh: usize,
        primitive: usize,
        matrix: Mat4,
    ) -> Result<PrimitivePlan, GltfError> {
        let topology = accessor::topology(def.mode)
            .ok_or_else(|| GltfError::Unsupported(format!("primitive mode {}", def.mode)))?;
        let indices = def
            .indices
            .ok_or_else(|| GltfError::Unsupported("primitive has no indices".to_string()))?;

        let index_accessor = doc
            .root()
            .accessors
            .get(indices)
            .ok_or_else(|| GltfError::Malformed(format!("accessor {indices} does not exist")))?;
        let index_type = accessor::index_type(index_accessor.component_type).ok_or_else(|| {
            GltfError::Unsupported(format!("index component type {}", index_accessor.component_type))
        })?;
        let index_data = read_accessor(doc, indices)?;
        if index_data.count == 0 {
            return Err(GltfError::Malformed("primitive has an empty index accessor".to_string()));
        }

        let mut attributes = Vec::new();
        for (name, &accessor_index) in &def.attributes {
            let Some(location) = attribute_location(name) else {
                log::debug!("Ignoring attribute {name}");
                continue;
            };
            let attr = doc
                .root()
                .accessors
                .get(accessor_index)
                .ok_or_else(|| GltfError::Malformed(format!("accessor {accessor_index} does not exist")))?;
            let format = accessor::attribute_format(attr.component_type, &attr.kind, attr.normalized)
                .ok_or_else(|| {
                    GltfError::Unsupported(format!(
                        "attribute {name} with component type {} and type {}",
                        attr.component_type, attr.kind
                    ))
                })?;
            let data = read_accessor(doc, accessor_index)?;
            if data.count == 0 {
                return Err(GltfError::Malformed(format!("attribute {name} is empty")));
            }
            attributes.push(PlannedAttribute { location, format, data });
        }
        attributes.sort_by_key(|a| a.location);

        Ok(PrimitivePlan {
            mesh,
            primitive,
            matrix,
            topology,
            index_type,
            indices: index_data,
            attributes,
            material: def.material,
        })
    }

    fn upload_primitive(
        device: &Arc<Device>,
        plan: &PrimitivePlan,
        materials: &[Arc<Material>],
    ) -> Result<MeshPrimitive, GltfError> {
        let mut primitive = MeshPrimitive::new(device, plan.topology);
        for attr in &plan.attributes {
            primitive.add_vertex_buf(attr.location, attr.format, attr.data.element_size as u32, &attr.data.bytes)?;
        }
        primitive.set_index_buf(plan.index_type, &plan.indices.bytes)?;
        primitive.set_matrix(plan.matrix);

        if let Some(material) = plan.material.and_then(|m| materials.get(m)) {
            primitive.set_material(Arc::clone(material));
        }
        Ok(primitive)
    }
}

/// Local matrix of a node: `matrix` when given, otherwise `T * S * R`
pub(crate) fn node_matrix(node: &NodeDef) -> Mat4 {
    if let Some(m) = node.matrix {
        return Mat4::from_column_slice(&m);
    }

    let mut transform = Transform::identity();
    if let Some([x, y, z]) = node.translation {
        transform.position = Vec3::new(x, y, z);
    }
    if let Some([x, y, z, w]) = node.rotation {
        transform.rotation = Quat::new_normalize(Quaternion::new(w, x, y, z));
    }
    if let Some([x, y, z]) = node.scale {
        transform.scale = Vec3::new(x, y, z);
    }
    transform.to_matrix()
}

/// Nodes traversal starts from
///
/// The default scene, else scene 0, else every node no other node lists as a child.
pub(crate) fn root_nodes(doc: &GltfDocument) -> Vec<usize> {
    let root = doc.root();
    let scene = root.scene.or(if root.scenes.is_empty() { None } else { Some(0) });
    if let Some(scene) = scene.and_then(|s| root.scenes.get(s)) {
        return scene.nodes.clone();
    }

    let mut is_child = vec![false; root.nodes.len()];
    for node in &root.nodes {
        for &child in &node.children {
            if let Some(flag) = is_child.get_mut(child) {
                *flag = true;
            }
        }
    }
    (0..root.nodes.len()).filter(|&i| !is_child[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::foundation::math::Vec4;

    fn doc(json: &str) -> GltfDocument {
        GltfDocument::from_slice(json.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_node_matrix_defaults_to_identity() {
        assert_eq!(node_matrix(&NodeDef::default()), Mat4::identity());
    }

    #[test]
    fn test_node_matrix_translation_scale_rotation() {
        let node = NodeDef {
            translation: Some([1.0, 2.0, 3.0]),
            // 90 degrees about Z
            rotation: Some([0.0, 0.0, std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2]),
            scale: Some([2.0, 2.0, 2.0]),
            ..NodeDef::default()
        };
        let p = node_matrix(&node) * Vec4::new(1.0, 0.0, 0.0, 1.0);
        // rotate to +Y, scale by 2, then translate
        assert_relative_eq!(p, Vec4::new(1.0, 4.0, 3.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_explicit_matrix_wins_over_trs() {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = 1.0;
        m[10] = 1.0;
        m[15] = 1.0;
        m[12] = 5.0;
        let node = NodeDef {
            matrix: Some(m),
            translation: Some([1.0, 1.0, 1.0]),
            ..NodeDef::default()
        };
        let p = node_matrix(&node) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p, Vec4::new(5.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_root_nodes_from_default_scene() {
        let d = doc(r#"{"scene":1,"scenes":[{"nodes":[0]},{"nodes":[2,1]}],"nodes":[{},{},{}]}"#);
        assert_eq!(root_nodes(&d), vec![2, 1]);
    }

    #[test]
    fn test_root_nodes_fall_back_to_scene_zero() {
        let d = doc(r#"{"scenes":[{"nodes":[1]}],"nodes":[{},{}]}"#);
        assert_eq!(root_nodes(&d), vec![1]);
    }

    #[test]
    fn test_root_nodes_without_scenes_skip_children() {
        let d = doc(r#"{"nodes":[{"children":[2]},{},{}]}"#);
        assert_eq!(root_nodes(&d), vec![0, 1]);
    }
}
