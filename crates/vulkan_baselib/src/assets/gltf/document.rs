//! glTF JSON schema and binary payload resolution
//!
//! Only the parts of glTF 2.0 the loader consumes are modelled. Unknown
//! fields are ignored by serde.

use base64::Engine as _;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::GltfError;

/// `glTF` in little-endian
const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_HEADER_LEN: usize = 12;
const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;
const GLB_CHUNK_BIN: u32 = 0x004E_4942;

/// Top-level glTF object
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Root {
    /// Default scene
    pub scene: Option<usize>,
    /// Scene list
    pub scenes: Vec<SceneDef>,
    /// Node list
    pub nodes: Vec<NodeDef>,
    /// Mesh list
    pub meshes: Vec<MeshDef>,
    /// Accessor list
    pub accessors: Vec<AccessorDef>,
    /// Buffer view list
    pub buffer_views: Vec<BufferViewDef>,
    /// Buffer list
    pub buffers: Vec<BufferDef>,
    /// Material list
    pub materials: Vec<MaterialDef>,
    /// Texture list
    pub textures: Vec<TextureDef>,
    /// Image list
    pub images: Vec<ImageDef>,
}

/// Set of root nodes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SceneDef {
    /// Root node indices
    pub nodes: Vec<usize>,
}

/// Node in the scene hierarchy
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeDef {
    /// Optional name
    pub name: Option<String>,
    /// Mesh drawn at this node
    pub mesh: Option<usize>,
    /// Child node indices
    pub children: Vec<usize>,
    /// Column-major local matrix, replaces TRS when present
    pub matrix: Option<[f32; 16]>,
    /// Translation
    pub translation: Option<[f32; 3]>,
    /// Rotation quaternion as `[x, y, z, w]`
    pub rotation: Option<[f32; 4]>,
    /// Scale
    pub scale: Option<[f32; 3]>,
}

/// Mesh made of primitives
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MeshDef {
    /// Optional name
    pub name: Option<String>,
    /// Primitives
    pub primitives: Vec<PrimitiveDef>,
}

/// Mode used when a primitive omits it
pub const MODE_TRIANGLES: u32 = 4;

fn default_mode() -> u32 {
    MODE_TRIANGLES
}

/// Drawable primitive
#[derive(Debug, Clone, Deserialize)]
pub struct PrimitiveDef {
    /// Attribute name to accessor index
    #[serde(default)]
    pub attributes: BTreeMap<String, usize>,
    /// Index accessor
    #[serde(default)]
    pub indices: Option<usize>,
    /// Material index
    #[serde(default)]
    pub material: Option<usize>,
    /// Topology mode
    #[serde(default = "default_mode")]
    pub mode: u32,
}

/// Typed view into a buffer view
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessorDef {
    /// Source buffer view; absent means all zeros
    pub buffer_view: Option<usize>,
    /// Offset within the buffer view
    pub byte_offset: usize,
    /// Component type code
    pub component_type: u32,
    /// Integer components are normalized
    pub normalized: bool,
    /// Element count
    pub count: usize,
    /// Element type, e.g. `VEC3`
    #[serde(rename = "type")]
    pub kind: String,
    /// Sparse substitution, unsupported
    pub sparse: Option<serde_json::Value>,
}

/// Byte range of a buffer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BufferViewDef {
    /// Buffer index
    pub buffer: usize,
    /// Offset into the buffer
    pub byte_offset: usize,
    /// Length in bytes
    pub byte_length: usize,
    /// Distance between elements, tightly packed when absent
    pub byte_stride: Option<usize>,
}

/// Binary payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BufferDef {
    /// Data URI or relative path; absent for the GLB binary chunk
    pub uri: Option<String>,
    /// Declared length
    pub byte_length: usize,
}

/// Metallic-roughness material
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaterialDef {
    /// Optional name
    pub name: Option<String>,
    /// PBR block
    pub pbr_metallic_roughness: PbrDef,
    /// Disable back-face culling
    pub double_sided: bool,
}

/// PBR metallic-roughness factors
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PbrDef {
    /// Linear base colour
    pub base_color_factor: [f32; 4],
    /// Metalness
    pub metallic_factor: f32,
    /// Roughness
    pub roughness_factor: f32,
    /// Base colour texture
    pub base_color_texture: Option<TextureRef>,
}

impl Default for PbrDef {
    fn default() -> Self {
        Self {
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            base_color_texture: None,
        }
    }
}

/// Reference from a material to a texture
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextureRef {
    /// Texture index
    pub index: usize,
    /// Texture coordinate set
    pub tex_coord: u32,
}

/// Texture, an image plus a sampler
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextureDef {
    /// Image index
    pub source: Option<usize>,
}

/// Encoded image
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageDef {
    /// Data URI or relative path
    pub uri: Option<String>,
    /// Buffer view holding the encoded bytes
    pub buffer_view: Option<usize>,
    /// MIME type of buffer view data
    pub mime_type: Option<String>,
}

/// Parsed glTF document with every buffer resolved to bytes
#[derive(Debug, Clone)]
pub struct GltfDocument {
    root: Root,
    buffers: Vec<Vec<u8>>,
    base_dir: Option<PathBuf>,
}

impl GltfDocument {
    /// Read a `.gltf` or `.glb` file
    ///
    /// External buffers and images are resolved relative to the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GltfError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        log::debug!("Loading glTF document {}", path.display());
        Self::from_slice(&bytes, path.parent())
    }

    /// Parse JSON or GLB bytes
    ///
    /// Without `base_dir`, buffers and images must be embedded.
    pub fn from_slice(bytes: &[u8], base_dir: Option<&Path>) -> Result<Self, GltfError> {
        let (json, bin) = if bytes.len() >= 4 && read_u32(bytes, 0) == Some(GLB_MAGIC) {
            split_glb(bytes)?
        } else {
            (bytes, None)
        };

        let root: Root = serde_json::from_slice(json)?;
        let base_dir = base_dir.map(Path::to_path_buf);
        let buffers = root
            .buffers
            .iter()
            .enumerate()
            .map(|(index, def)| load_buffer(index, def, bin, base_dir.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { root, buffers, base_dir })
    }

    /// JSON object model
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Resolved bytes of buffer `index`
    pub fn buffer(&self, index: usize) -> Result<&[u8], GltfError> {
        self.buffers
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| GltfError::Malformed(format!("buffer {index} does not exist")))
    }

    /// Bytes covered by buffer view `index`
    pub fn buffer_view(&self, index: usize) -> Result<(&BufferViewDef, &[u8]), GltfError> {
        let view = self
            .root
            .buffer_views
            .get(index)
            .ok_or_else(|| GltfError::Malformed(format!("buffer view {index} does not exist")))?;
        let buffer = self.buffer(view.buffer)?;
        let end = view.byte_offset.checked_add(view.byte_length);
        let bytes = end
            .and_then(|end| buffer.get(view.byte_offset..end))
            .ok_or_else(|| GltfError::Malformed(format!("buffer view {index} exceeds buffer {}", view.buffer)))?;
        Ok((view, bytes))
    }

    /// Encoded bytes of image `index`
    pub fn image_bytes(&self, index: usize) -> Result<Cow<'_, [u8]>, GltfError> {
        let image = self
            .root
            .images
            .get(index)
            .ok_or_else(|| GltfError::Malformed(format!("image {index} does not exist")))?;

        match (&image.uri, image.buffer_view) {
            (Some(uri), _) => load_uri(uri, self.base_dir.as_deref()).map(Cow::Owned),
            (None, Some(view)) => self.buffer_view(view).map(|(_, bytes)| Cow::Borrowed(bytes)),
            (None, None) => Err(GltfError::Malformed(format!("image {index} has neither uri nor buffer view"))),
        }
    }

    /// Image index behind texture `index`
    pub fn texture_source(&self, index: usize) -> Result<usize, GltfError> {
        self.root
            .textures
            .get(index)
            .and_then(|t| t.source)
            .ok_or_else(|| GltfError::Malformed(format!("texture {index} has no image source")))
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let chunk = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Split a GLB container into its JSON chunk and optional BIN chunk
fn split_glb(bytes: &[u8]) -> Result<(&[u8], Option<&[u8]>), GltfError> {
    let malformed = |what: &str| GltfError::Malformed(format!("GLB {what}"));

    let version = read_u32(bytes, 4).ok_or_else(|| malformed("header truncated"))?;
    if version != 2 {
        return Err(GltfError::Malformed(format!("GLB version {version} is not supported")));
    }
    let total = read_u32(bytes, 8).ok_or_else(|| malformed("header truncated"))? as usize;
    let bytes = bytes.get(..total).ok_or_else(|| malformed("shorter than declared length"))?;

    let mut json = None;
    let mut bin = None;
    let mut offset = GLB_HEADER_LEN;
    while offset < bytes.len() {
        let length = read_u32(bytes, offset).ok_or_else(|| malformed("chunk header truncated"))? as usize;
        let kind = read_u32(bytes, offset + 4).ok_or_else(|| malformed("chunk header truncated"))?;
        let start = offset + 8;
        let data = start
            .checked_add(length)
            .and_then(|end| bytes.get(start..end))
            .ok_or_else(|| malformed("chunk exceeds file"))?;
        match kind {
            GLB_CHUNK_JSON if json.is_none() => json = Some(data),
            GLB_CHUNK_BIN if bin.is_none() => bin = Some(data),
            _ => log::debug!("Skipping GLB chunk 0x{kind:08x}"),
        }
        // chunks are 4-byte aligned
        offset = start + length.next_multiple_of(4);
    }

    let json = json.ok_or_else(|| malformed("has no JSON chunk"))?;
    Ok((json, bin))
}

fn load_buffer(index: usize, def: &BufferDef, bin: Option<&[u8]>, base_dir: Option<&Path>) -> Result<Vec<u8>, GltfError> {
    let data = match (&def.uri, bin) {
        (Some(uri), _) => load_uri(uri, base_dir)?,
        (None, Some(bin)) if index == 0 => bin.to_vec(),
        (None, _) => return Err(GltfError::Malformed(format!("buffer {index} has no uri and no GLB chunk"))),
    };
    if data.len() < def.byte_length {
        return Err(GltfError::Malformed(format!(
            "buffer {index} holds {} bytes, {} declared",
            data.len(),
            def.byte_length
        )));
    }
    Ok(data)
}

/// Resolve a data URI or a path relative to `base_dir`
fn load_uri(uri: &str, base_dir: Option<&Path>) -> Result<Vec<u8>, GltfError> {
    if let Some(rest) = uri.strip_prefix("data:") {
        return decode_data_uri(rest);
    }
    let base_dir = base_dir.ok_or_else(|| GltfError::Malformed(format!("external uri {uri} without a base directory")))?;
    Ok(std::fs::read(base_dir.join(uri))?)
}

fn decode_data_uri(rest: &str) -> Result<Vec<u8>, GltfError> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| GltfError::Malformed("data uri has no payload".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(GltfError::Malformed(format!("data uri encoding {header} is not base64")));
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = GLB_HEADER_LEN + 8 + json.len() + 8 + bin.len();

        let mut out = Vec::new();
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&GLB_CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin);
        out
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let doc = GltfDocument::from_slice(br#"{"asset":{"version":"2.0"},"meshes":[{"primitives":[{"attributes":{}}]}],"materials":[{}]}"#, None)
            .unwrap();
        let root = doc.root();
        assert_eq!(root.meshes[0].primitives[0].mode, MODE_TRIANGLES);
        assert_eq!(root.materials[0].pbr_metallic_roughness.base_color_factor, [1.0; 4]);
        assert_eq!(root.materials[0].pbr_metallic_roughness.metallic_factor, 1.0);
        assert!(!root.materials[0].double_sided);
    }

    #[test]
    fn test_data_uri_buffer() {
        // [1, 2, 3, 4]
        let json = r#"{"buffers":[{"uri":"data:application/octet-stream;base64,AQIDBA==","byteLength":4}],
                      "bufferViews":[{"buffer":0,"byteOffset":1,"byteLength":2}]}"#;
        let doc = GltfDocument::from_slice(json.as_bytes(), None).unwrap();
        assert_eq!(doc.buffer(0).unwrap(), &[1, 2, 3, 4]);
        let (_, bytes) = doc.buffer_view(0).unwrap();
        assert_eq!(bytes, &[2, 3]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let json = r#"{"buffers":[{"uri":"data:application/octet-stream;base64,AQI=","byteLength":4}]}"#;
        assert!(matches!(
            GltfDocument::from_slice(json.as_bytes(), None),
            Err(GltfError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_base64_data_uri_is_rejected() {
        let json = r#"{"buffers":[{"uri":"data:text/plain,hello","byteLength":5}]}"#;
        assert!(GltfDocument::from_slice(json.as_bytes(), None).is_err());
    }

    #[test]
    fn test_external_uri_needs_base_dir() {
        let json = r#"{"buffers":[{"uri":"mesh.bin","byteLength":4}]}"#;
        assert!(matches!(
            GltfDocument::from_slice(json.as_bytes(), None),
            Err(GltfError::Malformed(_))
        ));
    }

    #[test]
    fn test_glb_binary_chunk_backs_first_buffer() {
        let json = r#"{"buffers":[{"byteLength":3}],"bufferViews":[{"buffer":0,"byteLength":3}]}"#;
        let doc = GltfDocument::from_slice(&glb(json, &[7, 8, 9]), None).unwrap();
        let (_, bytes) = doc.buffer_view(0).unwrap();
        assert_eq!(bytes, &[7, 8, 9]);
    }

    #[test]
    fn test_glb_wrong_version() {
        let mut bytes = glb("{}", &[]);
        bytes[4] = 1;
        assert!(matches!(GltfDocument::from_slice(&bytes, None), Err(GltfError::Malformed(_))));
    }

    #[test]
    fn test_image_from_buffer_view() {
        let json = r#"{"buffers":[{"byteLength":4}],"bufferViews":[{"buffer":0,"byteOffset":2,"byteLength":2}],
                      "images":[{"bufferView":0,"mimeType":"image/png"}],"textures":[{"source":0}]}"#;
        let doc = GltfDocument::from_slice(&glb(json, &[0, 0, 0xAB, 0xCD]), None).unwrap();
        assert_eq!(doc.texture_source(0).unwrap(), 0);
        assert_eq!(doc.image_bytes(0).unwrap().as_ref(), &[0xAB, 0xCD]);
    }

    #[test]
    fn test_buffer_view_out_of_range() {
        let json = r#"{"buffers":[{"uri":"data:application/octet-stream;base64,AQIDBA==","byteLength":4}],
                      "bufferViews":[{"buffer":0,"byteOffset":3,"byteLength":2}]}"#;
        let doc = GltfDocument::from_slice(json.as_bytes(), None).unwrap();
        assert!(doc.buffer_view(0).is_err());
    }
}
