//! Resolution of the raw manifest into typed stream records.

use std::collections::HashMap;

use glam::Vec3;

use super::gltf::{AccessorDef, DecodeRange, Manifest, PrimitiveDef, StreamPrimitive};
use super::ManifestError;
use crate::codec::DecodeBounds;
use crate::constants::gltf::{FLOAT, UNSIGNED_BYTE, UNSIGNED_SHORT};
use crate::mesh::{
    run_start, Accessor, ComponentType, DeltaFrame, FallbackLayout, FrameKind, Keyframe, MeshFrame,
    NormalEncoding, QuantizedAttribute,
};

/// One network-fetched binary blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSpec {
    pub uri: String,
    pub byte_length: usize,
}

/// One video segment of the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub hls_uri: Option<String>,
    pub dash_uri: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Watermark block edge in pixels
    pub block_size: u32,
}

/// Stream properties reported to the client once the manifest loads.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub have_normals: bool,
    pub oct_encoded_normals: bool,
    pub video_width: u32,
    pub video_height: u32,
    pub max_vertex_count: usize,
    pub max_index_count: usize,
    pub bounding_box: DecodeBounds,
}

/// Everything the player needs from a manifest, with indices resolved.
#[derive(Debug, Clone)]
pub struct StreamLayout {
    /// Descriptor 0 is the fallback buffer
    pub buffers: Vec<BufferSpec>,
    pub frames: Vec<MeshFrame>,
    pub timeline: Vec<Segment>,
    pub fallback: Option<FallbackLayout>,
    pub file_info: FileInfo,
}

impl StreamLayout {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest = Manifest::from_slice(bytes)?;
        resolve(&manifest)
    }
}

/// Resolve a parsed manifest, validating every structural guarantee the
/// decoder relies on.
pub fn resolve(manifest: &Manifest) -> Result<StreamLayout, ManifestError> {
    let ext = manifest
        .extensions
        .holovideo
        .as_ref()
        .ok_or(ManifestError::MissingExtension)?;

    if manifest.buffers.len() < 2 {
        return Err(ManifestError::NoStreamBuffers {
            count: manifest.buffers.len(),
        });
    }
    if ext.timeline.is_empty() {
        return Err(ManifestError::EmptyTimeline);
    }
    if manifest.meshes.is_empty() {
        return Err(ManifestError::NoFrames);
    }

    let buffers = manifest
        .buffers
        .iter()
        .map(|b| BufferSpec {
            uri: b.uri.clone(),
            byte_length: b.byte_length,
        })
        .collect();

    let mut timeline = Vec::with_capacity(ext.timeline.len());
    for entry in &ext.timeline {
        let image = manifest.images.get(entry.image).ok_or(ManifestError::BadIndex {
            kind: "image",
            index: entry.image,
        })?;
        let video = image
            .extensions
            .holovideo
            .as_ref()
            .ok_or_else(|| missing(format!("image {}", entry.image), "extensions.HCAP_holovideo"))?;
        let uri = image
            .uri
            .clone()
            .ok_or_else(|| missing(format!("image {}", entry.image), "uri"))?;
        timeline.push(Segment {
            uri,
            hls_uri: video.hls_uri.clone(),
            dash_uri: video.dash_uri.clone(),
            width: video.width,
            height: video.height,
            block_size: video.block_size.max(1),
        });
    }

    let mut frames = Vec::with_capacity(manifest.meshes.len());
    for (index, mesh) in manifest.meshes.iter().enumerate() {
        frames.push(resolve_frame(manifest, index, mesh.primitives.first())?);
    }
    validate_runs(&frames)?;

    let fallback = resolve_fallback(manifest)?;

    let file_info = FileInfo {
        have_normals: frames.iter().any(|f| f.normals.is_some()),
        oct_encoded_normals: frames
            .iter()
            .any(|f| matches!(f.normals, Some(NormalEncoding::Oct8(_)))),
        video_width: timeline[0].width,
        video_height: timeline[0].height,
        max_vertex_count: ext.max_vertex_count,
        max_index_count: ext.max_index_count,
        bounding_box: DecodeBounds::new(
            Vec3::from_array(ext.bounding_min),
            Vec3::from_array(ext.bounding_max),
        ),
    };

    log::info!(
        "[Manifest] {} buffers, {} frames, {} segments, max {} vertices",
        manifest.buffers.len(),
        frames.len(),
        timeline.len(),
        file_info.max_vertex_count
    );

    Ok(StreamLayout {
        buffers,
        frames,
        timeline,
        fallback,
        file_info,
    })
}

fn missing(context: String, field: &'static str) -> ManifestError {
    ManifestError::MissingField { context, field }
}

fn stream_primitive(
    index: usize,
    primitive: Option<&PrimitiveDef>,
) -> Result<&StreamPrimitive, ManifestError> {
    primitive
        .and_then(|p| p.extensions.holovideo.as_ref())
        .ok_or_else(|| missing(format!("mesh {}", index), "primitives[0].extensions.HCAP_holovideo"))
}

fn attribute(
    attributes: &HashMap<String, usize>,
    name: &'static str,
    frame: usize,
) -> Result<usize, ManifestError> {
    attributes
        .get(name)
        .copied()
        .ok_or_else(|| missing(format!("mesh {}", frame), name))
}

fn resolve_frame(
    manifest: &Manifest,
    index: usize,
    primitive: Option<&PrimitiveDef>,
) -> Result<MeshFrame, ManifestError> {
    let prim = stream_primitive(index, primitive)?;

    let kind = if prim.attributes.contains_key("POSITION") {
        let positions = quantized(manifest, attribute(&prim.attributes, "POSITION", index)?)?;
        let uvs = resolve_accessor(manifest, attribute(&prim.attributes, "TEXCOORD_0", index)?)?;
        let indices_idx = prim
            .indices
            .ok_or_else(|| missing(format!("mesh {}", index), "indices"))?;
        let indices = resolve_accessor(manifest, indices_idx)?;
        require(&positions.accessor, ComponentType::U16, 3, "POSITION")?;
        require(&uvs, ComponentType::U16, 2, "TEXCOORD_0")?;
        require(&indices, ComponentType::U16, 1, "indices")?;
        FrameKind::Keyframe(Keyframe {
            positions,
            uvs,
            indices,
        })
    } else {
        let deltas = quantized(manifest, attribute(&prim.attributes, "_DELTA", index)?)?;
        require(&deltas.accessor, ComponentType::U8, 3, "_DELTA")?;
        FrameKind::Delta(DeltaFrame { deltas })
    };

    let normals = match prim.attributes.get("NORMAL") {
        Some(&n) => {
            let accessor = resolve_accessor(manifest, n)?;
            Some(match accessor.components {
                2 => {
                    require(&accessor, ComponentType::U8, 2, "NORMAL")?;
                    NormalEncoding::Oct8(accessor)
                }
                _ => {
                    require(&accessor, ComponentType::U16, 3, "NORMAL")?;
                    NormalEncoding::Quantized16(accessor)
                }
            })
        }
        None => None,
    };

    let frame = MeshFrame {
        index,
        kind,
        normals,
    };
    if frame.buffers().contains(&0) {
        return Err(ManifestError::FallbackReference { frame: index });
    }
    Ok(frame)
}

fn require(
    accessor: &Accessor,
    component_type: ComponentType,
    components: usize,
    name: &'static str,
) -> Result<(), ManifestError> {
    if accessor.component_type != component_type || accessor.components != components {
        return Err(ManifestError::UnsupportedAccessor {
            attribute: name,
            reason: format!(
                "expected {}x{:?}, found {}x{:?}",
                components, component_type, accessor.components, accessor.component_type
            ),
        });
    }
    Ok(())
}

fn accessor_def(manifest: &Manifest, index: usize) -> Result<&AccessorDef, ManifestError> {
    manifest
        .accessors
        .get(index)
        .ok_or(ManifestError::BadIndex {
            kind: "accessor",
            index,
        })
}

fn resolve_accessor(manifest: &Manifest, index: usize) -> Result<Accessor, ManifestError> {
    let def = accessor_def(manifest, index)?;
    let view = manifest
        .buffer_views
        .get(def.buffer_view)
        .ok_or(ManifestError::BadIndex {
            kind: "bufferView",
            index: def.buffer_view,
        })?;
    let buffer = manifest.buffers.get(view.buffer).ok_or(ManifestError::BadIndex {
        kind: "buffer",
        index: view.buffer,
    })?;

    let component_type = match def.component_type {
        UNSIGNED_BYTE => ComponentType::U8,
        UNSIGNED_SHORT => ComponentType::U16,
        FLOAT => ComponentType::F32,
        other => {
            return Err(ManifestError::UnsupportedAccessor {
                attribute: "componentType",
                reason: format!("accessor {} uses component type {}", index, other),
            })
        }
    };
    let components = match def.element_type.as_str() {
        "SCALAR" => 1,
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" => 4,
        other => {
            return Err(ManifestError::UnsupportedAccessor {
                attribute: "type",
                reason: format!("accessor {} has element type {}", index, other),
            })
        }
    };

    let out_of_bounds = || ManifestError::AccessorOutOfBounds { accessor: index };
    let accessor = Accessor {
        buffer: view.buffer,
        byte_offset: view
            .byte_offset
            .checked_add(def.byte_offset)
            .ok_or_else(out_of_bounds)?,
        count: def.count,
        components,
        component_type,
    };

    let end_in_view = accessor
        .byte_len()
        .and_then(|len| def.byte_offset.checked_add(len));
    let end_in_buffer = view.byte_offset.checked_add(view.byte_length);
    match (end_in_view, end_in_buffer) {
        (Some(v), Some(b)) if v <= view.byte_length && b <= buffer.byte_length => Ok(accessor),
        _ => Err(out_of_bounds()),
    }
}

fn decode_range(manifest: &Manifest, index: usize) -> Result<DecodeRange, ManifestError> {
    accessor_def(manifest, index)?
        .extensions
        .holovideo
        .ok_or_else(|| missing(format!("accessor {}", index), "decodeMin/decodeMax"))
}

fn bounds_of(range: DecodeRange) -> DecodeBounds {
    DecodeBounds::new(
        Vec3::from_array(range.decode_min),
        Vec3::from_array(range.decode_max),
    )
}

fn quantized(manifest: &Manifest, index: usize) -> Result<QuantizedAttribute, ManifestError> {
    Ok(QuantizedAttribute {
        accessor: resolve_accessor(manifest, index)?,
        bounds: bounds_of(decode_range(manifest, index)?),
    })
}

/// Frame 0 must be a keyframe and every delta must match its run's vertex count.
fn validate_runs(frames: &[MeshFrame]) -> Result<(), ManifestError> {
    if !frames[0].is_keyframe() {
        return Err(ManifestError::FirstFrameNotKeyframe);
    }
    for frame in frames.iter().filter(|f| !f.is_keyframe()) {
        let key = &frames[run_start(frames, frame.index)];
        if key.vertex_count() != frame.vertex_count() {
            return Err(ManifestError::VertexCountMismatch {
                frame: frame.index,
                expected: key.vertex_count(),
                actual: frame.vertex_count(),
            });
        }
    }
    Ok(())
}

/// Mesh 0's plain glTF attributes plus image 0, all stored in buffer 0.
fn resolve_fallback(manifest: &Manifest) -> Result<Option<FallbackLayout>, ManifestError> {
    let Some(prim) = manifest.meshes.first().and_then(|m| m.primitives.first()) else {
        return Ok(None);
    };
    let (Some(&pos), Some(&uv), Some(idx)) = (
        prim.attributes.get("POSITION"),
        prim.attributes.get("TEXCOORD_0"),
        prim.indices,
    ) else {
        log::debug!("[Manifest] Mesh 0 has no fallback geometry");
        return Ok(None);
    };

    let positions = resolve_accessor(manifest, pos)?;
    let uvs = resolve_accessor(manifest, uv)?;
    let indices = resolve_accessor(manifest, idx)?;
    let normals = prim
        .attributes
        .get("NORMAL")
        .map(|&n| resolve_accessor(manifest, n))
        .transpose()?;

    let image = match manifest.images.first().and_then(|i| i.buffer_view) {
        Some(view_index) => {
            let view = manifest
                .buffer_views
                .get(view_index)
                .ok_or(ManifestError::BadIndex {
                    kind: "bufferView",
                    index: view_index,
                })?;
            let end = view
                .byte_offset
                .checked_add(view.byte_length)
                .ok_or(ManifestError::BufferViewOutOfBounds { view: view_index })?;
            Some((view.buffer, view.byte_offset..end))
        }
        None => None,
    };

    let in_buffer_zero = [Some(&positions), Some(&uvs), Some(&indices), normals.as_ref()]
        .into_iter()
        .flatten()
        .all(|a| a.buffer == 0)
        && image.as_ref().map_or(true, |(b, _)| *b == 0);
    if !in_buffer_zero {
        return Err(ManifestError::FallbackOutsideBuffer);
    }

    // Bounds come from the quantization domain of frame 0's streamed positions
    let bounds = match stream_primitive(0, Some(prim))?.attributes.get("POSITION") {
        Some(&p) => bounds_of(decode_range(manifest, p)?),
        None => DecodeBounds::new(Vec3::ZERO, Vec3::ZERO),
    };

    Ok(Some(FallbackLayout {
        positions,
        normals,
        uvs,
        indices,
        image: image.map(|(_, range)| range),
        bounds,
    }))
}
