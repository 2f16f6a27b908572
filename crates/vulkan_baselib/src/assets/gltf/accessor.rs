//! Accessor decoding and glTF-to-Vulkan enum mapping

use ash::vk;

use super::document::GltfDocument;
use super::GltfError;

/// Signed 8-bit component
pub const BYTE: u32 = 5120;
/// Unsigned 8-bit component
pub const UNSIGNED_BYTE: u32 = 5121;
/// Signed 16-bit component
pub const SHORT: u32 = 5122;
/// Unsigned 16-bit component
pub const UNSIGNED_SHORT: u32 = 5123;
/// Signed 32-bit component, accepted for vertex data only
pub const INT: u32 = 5124;
/// Unsigned 32-bit component
pub const UNSIGNED_INT: u32 = 5125;
/// 32-bit float component
pub const FLOAT: u32 = 5126;

/// Size in bytes of one component
pub fn component_size(component_type: u32) -> Option<usize> {
    match component_type {
        BYTE | UNSIGNED_BYTE => Some(1),
        SHORT | UNSIGNED_SHORT => Some(2),
        INT | UNSIGNED_INT | FLOAT => Some(4),
        _ => None,
    }
}

/// Components per element for an accessor `type`
pub fn component_count(kind: &str) -> Option<usize> {
    match kind {
        "SCALAR" => Some(1),
        "VEC2" => Some(2),
        "VEC3" => Some(3),
        "VEC4" | "MAT2" => Some(4),
        "MAT3" => Some(9),
        "MAT4" => Some(16),
        _ => None,
    }
}

/// Vertex format for an attribute accessor
///
/// Covers float vectors, signed 32- and 16-bit integer vectors, and
/// normalized unsigned 8- and 16-bit vectors.
pub fn attribute_format(component_type: u32, kind: &str, normalized: bool) -> Option<vk::Format> {
    use vk::Format as F;

    let format = match (component_type, kind, normalized) {
        (FLOAT, "SCALAR", _) => F::R32_SFLOAT,
        (FLOAT, "VEC2", _) => F::R32G32_SFLOAT,
        (FLOAT, "VEC3", _) => F::R32G32B32_SFLOAT,
        (FLOAT, "VEC4", _) => F::R32G32B32A32_SFLOAT,
        (INT, "VEC2", _) => F::R32G32_SINT,
        (INT, "VEC3", _) => F::R32G32B32_SINT,
        (INT, "VEC4", _) => F::R32G32B32A32_SINT,
        (SHORT, "VEC2", false) => F::R16G16_SINT,
        (SHORT, "VEC3", false) => F::R16G16B16_SINT,
        (SHORT, "VEC4", false) => F::R16G16B16A16_SINT,
        (SHORT, "VEC2", true) => F::R16G16_SNORM,
        (SHORT, "VEC3", true) => F::R16G16B16_SNORM,
        (SHORT, "VEC4", true) => F::R16G16B16A16_SNORM,
        (UNSIGNED_SHORT, "VEC2", true) => F::R16G16_UNORM,
        (UNSIGNED_SHORT, "VEC4", true) => F::R16G16B16A16_UNORM,
        (UNSIGNED_BYTE, "VEC2", true) => F::R8G8_UNORM,
        (UNSIGNED_BYTE, "VEC4", true) => F::R8G8B8A8_UNORM,
        _ => return None,
    };
    Some(format)
}

/// Index type for an index accessor; 8-bit and signed indices are rejected
pub fn index_type(component_type: u32) -> Option<vk::IndexType> {
    match component_type {
        UNSIGNED_SHORT => Some(vk::IndexType::UINT16),
        UNSIGNED_INT => Some(vk::IndexType::UINT32),
        _ => None,
    }
}

/// Topology for a primitive mode; LINE_LOOP has no Vulkan equivalent
pub fn topology(mode: u32) -> Option<vk::PrimitiveTopology> {
    match mode {
        0 => Some(vk::PrimitiveTopology::POINT_LIST),
        1 => Some(vk::PrimitiveTopology::LINE_LIST),
        3 => Some(vk::PrimitiveTopology::LINE_STRIP),
        4 => Some(vk::PrimitiveTopology::TRIANGLE_LIST),
        5 => Some(vk::PrimitiveTopology::TRIANGLE_STRIP),
        6 => Some(vk::PrimitiveTopology::TRIANGLE_FAN),
        _ => None,
    }
}

/// Largest zero-filled accessor, in bytes, that an accessor without a
/// buffer view may produce
pub const MAX_ZERO_FILL_BYTES: usize = 64 << 20;

/// Tightly packed copy of an accessor's elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorData {
    /// glTF component type
    pub component_type: u32,
    /// Bytes per element
    pub element_size: usize,
    /// Number of elements
    pub count: usize,
    /// `element_size * count` bytes
    pub bytes: Vec<u8>,
}

/// Copy accessor `index` out of its buffer view, dropping any stride padding
///
/// An accessor without a buffer view yields zeros, up to
/// [`MAX_ZERO_FILL_BYTES`]. Sparse accessors are reported as
/// [`GltfError::Unsupported`]. Sizes and offsets that overflow or leave the
/// buffer view are [`GltfError::Malformed`].
pub fn read_accessor(doc: &GltfDocument, index: usize) -> Result<AccessorData, GltfError> {
    let accessor = doc
        .root()
        .accessors
        .get(index)
        .ok_or_else(|| GltfError::Malformed(format!("accessor {index} does not exist")))?;

    if accessor.sparse.is_some() {
        return Err(GltfError::Unsupported(format!("accessor {index} is sparse")));
    }

    let element_size = component_size(accessor.component_type)
        .zip(component_count(&accessor.kind))
        .map(|(size, count)| size * count)
        .ok_or_else(|| {
            GltfError::Malformed(format!(
                "accessor {index} has component type {} and type {}",
                accessor.component_type, accessor.kind
            ))
        })?;
    let total = element_size.checked_mul(accessor.count).ok_or_else(|| {
        GltfError::Malformed(format!("accessor {index} count {} overflows", accessor.count))
    })?;

    let Some(view_index) = accessor.buffer_view else {
        if total > MAX_ZERO_FILL_BYTES {
            return Err(GltfError::Malformed(format!(
                "accessor {index} without a buffer view asks for {total} bytes"
            )));
        }
        return Ok(AccessorData {
            component_type: accessor.component_type,
            element_size,
            count: accessor.count,
            bytes: vec![0; total],
        });
    };

    let (view, bytes) = doc.buffer_view(view_index)?;
    let stride = view.byte_stride.unwrap_or(element_size);
    if stride < element_size {
        return Err(GltfError::Malformed(format!(
            "accessor {index} stride {stride} is smaller than its {element_size}-byte element"
        )));
    }

    let out_of_range = || GltfError::Malformed(format!("accessor {index} exceeds buffer view {view_index}"));
    if accessor.count > 0 {
        // offset of the byte after the last element
        let end = stride
            .checked_mul(accessor.count - 1)
            .and_then(|span| span.checked_add(accessor.byte_offset))
            .and_then(|start| start.checked_add(element_size))
            .ok_or_else(out_of_range)?;
        if end > bytes.len() {
            return Err(out_of_range());
        }
    }

    // every element lies inside the view from here on
    let data = if accessor.count == 0 {
        Vec::new()
    } else if stride == element_size {
        bytes[accessor.byte_offset..accessor.byte_offset + total].to_vec()
    } else {
        let mut data = Vec::with_capacity(total);
        for i in 0..accessor.count {
            let start = accessor.byte_offset + i * stride;
            data.extend_from_slice(&bytes[start..start + element_size]);
        }
        data
    };

    Ok(AccessorData {
        component_type: accessor.component_type,
        element_size,
        count: accessor.count,
        bytes: data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn doc_with(bytes: &[u8], views: &str, accessors: &str) -> GltfDocument {
        let uri = base64::engine::general_purpose::STANDARD.encode(bytes);
        let json = format!(
            r#"{{"buffers":[{{"uri":"data:application/octet-stream;base64,{uri}","byteLength":{}}}],
                "bufferViews":{views},"accessors":{accessors}}}"#,
            bytes.len()
        );
        GltfDocument::from_slice(json.as_bytes(), None).unwrap()
    }

    #[test]
    fn test_index_types() {
        assert_eq!(index_type(UNSIGNED_SHORT), Some(vk::IndexType::UINT16));
        assert_eq!(index_type(UNSIGNED_INT), Some(vk::IndexType::UINT32));
        assert_eq!(index_type(UNSIGNED_BYTE), None);
        assert_eq!(index_type(SHORT), None);
    }

    #[test]
    fn test_line_loop_has_no_topology() {
        assert_eq!(topology(2), None);
        assert_eq!(topology(4), Some(vk::PrimitiveTopology::TRIANGLE_LIST));
        assert_eq!(topology(7), None);
    }

    #[test]
    fn test_attribute_formats() {
        assert_eq!(attribute_format(FLOAT, "VEC3", false), Some(vk::Format::R32G32B32_SFLOAT));
        assert_eq!(attribute_format(FLOAT, "VEC2", false), Some(vk::Format::R32G32_SFLOAT));
        assert_eq!(attribute_format(INT, "VEC4", false), Some(vk::Format::R32G32B32A32_SINT));
        assert_eq!(attribute_format(SHORT, "VEC2", false), Some(vk::Format::R16G16_SINT));
        assert_eq!(attribute_format(UNSIGNED_BYTE, "VEC2", false), None);
        assert_eq!(attribute_format(FLOAT, "MAT4", false), None);
    }

    #[test]
    fn test_tightly_packed_read() {
        let bytes: Vec<u8> = (0..12).collect();
        let doc = doc_with(
            &bytes,
            r#"[{"buffer":0,"byteLength":12}]"#,
            r#"[{"bufferView":0,"byteOffset":4,"componentType":5123,"count":3,"type":"SCALAR"}]"#,
        );
        let data = read_accessor(&doc, 0).unwrap();
        assert_eq!(data.element_size, 2);
        assert_eq!(data.count, 3);
        assert_eq!(data.bytes, vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_strided_read_drops_padding() {
        let bytes: Vec<u8> = (0..16).collect();
        let doc = doc_with(
            &bytes,
            r#"[{"buffer":0,"byteLength":16,"byteStride":8}]"#,
            r#"[{"bufferView":0,"componentType":5126,"count":2,"type":"SCALAR"}]"#,
        );
        let data = read_accessor(&doc, 0).unwrap();
        assert_eq!(data.bytes, vec![0, 1, 2, 3, 8, 9, 10, 11]);
    }

    #[test]
    fn test_overrun_is_malformed() {
        let bytes = [0u8; 8];
        let doc = doc_with(
            &bytes,
            r#"[{"buffer":0,"byteLength":8}]"#,
            r#"[{"bufferView":0,"componentType":5126,"count":3,"type":"SCALAR"}]"#,
        );
        assert!(matches!(read_accessor(&doc, 0), Err(GltfError::Malformed(_))));
    }

    #[test]
    fn test_missing_view_reads_zeros() {
        let doc = doc_with(&[0u8; 4], "[]", r#"[{"componentType":5126,"count":2,"type":"VEC2"}]"#);
        assert_eq!(read_accessor(&doc, 0).unwrap().bytes, vec![0; 16]);
    }

    #[test]
    fn test_sparse_is_unsupported() {
        let doc = doc_with(
            &[0u8; 4],
            "[]",
            r#"[{"componentType":5126,"count":1,"type":"SCALAR","sparse":{"count":0}}]"#,
        );
        assert!(matches!(read_accessor(&doc, 0), Err(GltfError::Unsupported(_))));
    }

    #[test]
    fn test_overflowing_count_is_malformed() {
        let doc = doc_with(
            &[0u8; 4],
            "[]",
            r#"[{"componentType":5126,"count":4611686018427387904,"type":"VEC4"}]"#,
        );
        assert!(matches!(read_accessor(&doc, 0), Err(GltfError::Malformed(_))));
    }

    #[test]
    fn test_overflowing_count_with_strided_view_is_malformed() {
        let bytes = [0u8; 32];
        let doc = doc_with(
            &bytes,
            r#"[{"buffer":0,"byteLength":32,"byteStride":16}]"#,
            r#"[{"bufferView":0,"componentType":5126,"count":2305843009213693952,"type":"SCALAR"}]"#,
        );
        assert!(matches!(read_accessor(&doc, 0), Err(GltfError::Malformed(_))));
    }

    #[test]
    fn test_huge_offset_is_malformed() {
        let bytes = [0u8; 8];
        let doc = doc_with(
            &bytes,
            r#"[{"buffer":0,"byteLength":8}]"#,
            r#"[{"bufferView":0,"byteOffset":18446744073709551612,"componentType":5126,"count":1,"type":"SCALAR"}]"#,
        );
        assert!(matches!(read_accessor(&doc, 0), Err(GltfError::Malformed(_))));
    }

    #[test]
    fn test_empty_accessor_ignores_offset() {
        let doc = doc_with(
            &[0u8; 4],
            r#"[{"buffer":0,"byteLength":4}]"#,
            r#"[{"bufferView":0,"byteOffset":64,"componentType":5126,"count":0,"type":"SCALAR"}]"#,
        );
        assert!(read_accessor(&doc, 0).unwrap().bytes.is_empty());
    }

    #[test]
    fn test_zero_fill_is_capped() {
        let count = MAX_ZERO_FILL_BYTES / 16 + 1;
        let accessors = format!(r#"[{{"componentType":5126,"count":{count},"type":"VEC4"}}]"#);
        let doc = doc_with(&[0u8; 4], "[]", &accessors);
        assert!(matches!(read_accessor(&doc, 0), Err(GltfError::Malformed(_))));
    }
}
