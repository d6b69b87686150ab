use num_enum::TryFromPrimitive;

use crate::geometry::types::VertexChannel;

/// Versions this codec understands. Anything outside fails before any
/// pass data is touched.
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=5;

/// Constants bound by the renderer itself rather than the effect file.
/// They are recorded but never counted into a stage's local constant
/// buffer.
pub const RESERVED_CONSTANTS: [&str; 4] = ["PerFrameVS", "PerObjectVS", "PerFramePS", "PerObjectPS"];

/// Register granularity of the constant store: 4 floats per register.
pub const REGISTER_WIDTH: u32 = 4;

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum StageType {
    Vertex = 0,
    Fragment = 1,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum TextureType {
    TwoD = 0,
    Cube = 1,
    Volume = 2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectConstant {
    pub name: String,
    /// Offset into the stage's flat float buffer, in floats. Always a
    /// multiple of `REGISTER_WIDTH`.
    pub offset: u32,
    /// Size in floats.
    pub size: u32,
    pub constant_type: u8,
    pub dimension: u8,
    pub elements: u8,
    pub is_srgb: bool,
    pub is_autoregister: bool,
}

impl EffectConstant {
    pub fn is_reserved(&self) -> bool {
        RESERVED_CONSTANTS.contains(&self.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EffectTexture {
    pub register_index: u8,
    pub name: String,
    pub texture_type: TextureType,
    pub flags: u8,
}

#[derive(Debug, Clone)]
pub struct EffectSampler {
    pub register_index: u8,
    pub name: Option<String>,
    pub filter: u8,
    pub mip_filter: u8,
    pub wrap_u: u8,
    pub wrap_v: u8,
    pub wrap_w: u8,
    pub max_anisotropy: u8,
    pub lod_bias: f32,
    pub border_color: u32,
    pub min_lod: f32,
    pub max_lod: f32,
    /// Resolved against the texture sharing the register index; samplers
    /// without a paired texture sample as 2D.
    pub sampler_type: TextureType,
}

#[derive(Debug, Clone)]
pub struct StageAsset {
    pub stage_type: StageType,
    pub inputs: Vec<VertexChannel>,
    pub shader: Vec<u8>,
    /// Alpha-test variant blob; absent blobs degrade to recompiling the
    /// primary shader with the shadow preprocessor prefix downstream.
    pub shadow_shader: Option<Vec<u8>>,
    pub constants: Vec<EffectConstant>,
    pub values: Vec<f32>,
    pub textures: Vec<EffectTexture>,
    pub samplers: Vec<EffectSampler>,
    /// Floats needed by the stage's own constants, reserved ones excluded.
    pub constant_buffer_size: u32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderState {
    pub state: u32,
    pub value: u32,
}

#[derive(Debug, Clone)]
pub struct PassAsset {
    pub stages: Vec<StageAsset>,
    pub states: Vec<RenderState>,
}

impl PassAsset {
    pub fn stage(&self, stage_type: StageType) -> Option<&StageAsset> {
        self.stages.iter().find(|s| s.stage_type == stage_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub value: AnnotationValue,
}

#[derive(Debug, Clone)]
pub struct EffectParameter {
    pub name: String,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct EffectAsset {
    pub version: u32,
    pub permutation: u32,
    pub passes: Vec<PassAsset>,
    pub parameters: Vec<EffectParameter>,
}
