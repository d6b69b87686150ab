use bitflags::bitflags;
use glam::{Mat3, Mat4, Quat, Vec3};
use num_enum::TryFromPrimitive;

/// Base encoding of a vertex channel component, the low nibble of the
/// packed file-type byte.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum VertexBaseType {
    Float32 = 0,
    Float16 = 1,
    UInt8 = 2,
    Int8 = 3,
    UInt16 = 4,
    Int16 = 5,
    UInt32 = 6,
    Int32 = 7,
}

/// One channel of a vertex declaration. `file_type` packs the base type
/// (low nibble), a normalization flag (bit 4) and the component count
/// minus one (bits 5..7).
#[derive(Debug, Copy, Clone)]
pub struct VertexChannel {
    pub usage: u8,
    pub usage_index: u8,
    pub file_type: u8,
}

impl VertexChannel {
    pub fn base_type(&self) -> Option<VertexBaseType> {
        VertexBaseType::try_from(self.file_type & 0x0f).ok()
    }

    pub fn is_normalized(&self) -> bool {
        self.file_type & 0x10 != 0
    }

    pub fn components(&self) -> usize {
        ((self.file_type >> 5) & 0x07) as usize + 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct VertexDeclaration {
    pub channels: Vec<VertexChannel>,
}

impl VertexDeclaration {
    /// Floats per vertex once every channel is decoded.
    pub fn stride(&self) -> usize {
        self.channels.iter().map(|c| c.components()).sum()
    }
}

/// All channels are decoded into a flat f32 array, vertex-major. The GPU
/// upload happens downstream, against this declaration.
#[derive(Debug, Clone, Default)]
pub struct VertexData {
    pub declaration: VertexDeclaration,
    pub count: u32,
    pub floats: Vec<f32>,
}

impl VertexData {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone)]
pub enum IndexData {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexData {
    pub fn len(&self) -> usize {
        match self {
            IndexData::U16(indices) => indices.len(),
            IndexData::U32(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of one index element in bytes (2 or 4).
    pub fn element_size(&self) -> usize {
        match self {
            IndexData::U16(_) => 2,
            IndexData::U32(_) => 4,
        }
    }
}

/// A named contiguous index range with axis-aligned bounds. `start` and
/// `count` are in index elements; `byte_offset` is `start` scaled by the
/// element size of the surrounding index buffer.
#[derive(Debug, Clone)]
pub struct MeshArea {
    pub name: String,
    pub start: u32,
    pub count: u32,
    pub byte_offset: usize,
    pub min: Vec3,
    pub max: Vec3,
}

#[derive(Debug, Clone)]
pub struct BlendShape {
    pub name: String,
    pub vertices: VertexData,
}

#[derive(Debug, Clone)]
pub struct MeshAsset {
    pub name: String,
    pub vertices: VertexData,
    pub indices: IndexData,
    pub areas: Vec<MeshArea>,
    pub bone_bindings: Vec<String>,
    pub blend_shapes: Vec<BlendShape>,
}

bitflags! {
    /// Which transform components a bone carries in the file.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct BoneFlags: u8 {
        const POSITION = 0x1;
        const ORIENTATION = 0x2;
        const SCALE_SHEAR = 0x4;
    }
}

pub const BONE_PARENT_NONE: i8 = -1;

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent_index: i8,
    pub position: Option<Vec3>,
    pub orientation: Option<Quat>,
    pub scale_shear: Option<Mat3>,
    pub local_transform: Mat4,
    pub world_transform: Mat4,
    pub world_transform_inv: Mat4,
}

impl Bone {
    pub fn is_root(&self) -> bool {
        self.parent_index == BONE_PARENT_NONE
    }
}

/// A mesh attached to a model skeleton. `bone_indices` holds, per
/// bone-binding name of the mesh, the index of the matching bone in the
/// model's skeleton; names the skeleton does not know are omitted.
#[derive(Debug, Clone)]
pub struct MeshBinding {
    pub mesh_index: u8,
    pub bone_indices: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ModelAsset {
    pub name: String,
    pub bones: Vec<Bone>,
    pub mesh_bindings: Vec<MeshBinding>,
}

impl ModelAsset {
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct CurveMask: u8 {
        const POSITION = 0x1;
        const ORIENTATION = 0x2;
        const SCALE_SHEAR = 0x4;
    }
}

/// Piecewise curve over a knot vector; degree 0 and 1 are step and linear,
/// anything above is evaluated as a spline by the animation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub degree: u8,
    pub dimension: usize,
    pub knots: Vec<f32>,
    pub controls: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct TransformTrack {
    pub bone_name: String,
    pub position: Option<Curve>,
    pub orientation: Option<Curve>,
    pub scale_shear: Option<Curve>,
}

#[derive(Debug, Clone)]
pub struct TrackGroup {
    pub model_name: String,
    pub tracks: Vec<TransformTrack>,
}

#[derive(Debug, Clone)]
pub struct AnimationAsset {
    pub name: String,
    pub duration: f32,
    pub groups: Vec<TrackGroup>,
}

#[derive(Debug, Clone)]
pub struct GeometryAsset {
    pub version: u8,
    pub meshes: Vec<MeshAsset>,
    pub models: Vec<ModelAsset>,
    pub animations: Vec<AnimationAsset>,
}
