use log::warn;

use crate::ParserError;
use crate::cursor::ByteCursor;
use crate::effect::types::{
    Annotation, AnnotationValue, EffectAsset, EffectConstant, EffectParameter, EffectSampler, EffectTexture, PassAsset,
    REGISTER_WIDTH, RenderState, StageAsset, StageType, SUPPORTED_VERSIONS, TextureType,
};
use crate::geometry::types::VertexChannel;

pub struct EffectReader {}

impl EffectReader {
    pub fn parse(data: &[u8]) -> Result<EffectAsset, ParserError> {
        let mut cur = ByteCursor::new(data);

        let version = cur.read_u32()?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ParserError::UnsupportedVersion { version });
        }

        let header_size = cur.read_u32()?;
        if header_size == 0 {
            return Err(ParserError::EmptyHeader);
        }
        let permutation = cur.read_u32()?;
        let offset = cur.read_u32()?;

        let mut header_table = Vec::with_capacity(header_size as usize);
        for _ in 0..header_size {
            header_table.push(cur.read_u32()?);
        }

        let string_table_size = cur.read_u32()? as usize;
        let string_table = cur.read_bytes(string_table_size)?;

        cur.seek(offset as usize)?;

        let pass_count = cur.read_u8()?;
        let mut passes = Vec::with_capacity(pass_count as usize);
        for _ in 0..pass_count {
            passes.push(EffectReader::read_pass(&mut cur, &string_table)?);
        }

        let parameter_count = cur.read_u16()?;
        let mut parameters = Vec::with_capacity(parameter_count as usize);
        for _ in 0..parameter_count {
            parameters.push(EffectReader::read_parameter(&mut cur, &string_table)?);
        }

        Ok(EffectAsset {
            version,
            permutation,
            passes,
            parameters,
        })
    }

    fn read_pass(cur: &mut ByteCursor, string_table: &[u8]) -> Result<PassAsset, ParserError> {
        let stage_count = cur.read_u8()?;
        let mut stages = Vec::with_capacity(stage_count as usize);
        for _ in 0..stage_count {
            stages.push(EffectReader::read_stage(cur, string_table)?);
        }

        let state_count = cur.read_u8()?;
        let mut states = Vec::with_capacity(state_count as usize);
        for _ in 0..state_count {
            states.push(RenderState {
                state: cur.read_u32()?,
                value: cur.read_u32()?,
            });
        }

        Ok(PassAsset { stages, states })
    }

    fn read_stage(cur: &mut ByteCursor, string_table: &[u8]) -> Result<StageAsset, ParserError> {
        let stage_type = StageType::try_from(cur.read_u8()?).map_err(|_| ParserError::FormatError {
            reason: "Stage type must be 0 (vertex) or 1 (fragment)",
        })?;

        let input_count = cur.read_u8()?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(VertexChannel {
                usage: cur.read_u8()?,
                usage_index: cur.read_u8()?,
                file_type: cur.read_u8()?,
            });
        }

        let shader_size = cur.read_u32()? as usize;
        let shader = cur.read_bytes(shader_size)?;

        let shadow_size = cur.read_u32()? as usize;
        let shadow_shader = if shadow_size > 0 {
            Some(cur.read_bytes(shadow_size)?)
        } else {
            None
        };

        let constant_count = cur.read_u8()?;
        let mut constants = Vec::with_capacity(constant_count as usize);
        let mut constant_buffer_size = 0u32;
        for _ in 0..constant_count {
            let constant = EffectReader::read_constant(cur, string_table)?;
            if !constant.is_reserved() {
                constant_buffer_size = constant_buffer_size.max(constant.offset + constant.size);
            }
            constants.push(constant);
        }

        let value_count = cur.read_u32()? as usize;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            values.push(cur.read_f32()?);
        }

        let texture_count = cur.read_u8()?;
        let mut textures = Vec::with_capacity(texture_count as usize);
        for _ in 0..texture_count {
            textures.push(EffectReader::read_texture(cur, string_table)?);
        }

        let sampler_count = cur.read_u8()?;
        let mut samplers = Vec::with_capacity(sampler_count as usize);
        for _ in 0..sampler_count {
            samplers.push(EffectReader::read_sampler(cur, string_table, &textures)?);
        }

        Ok(StageAsset {
            stage_type,
            inputs,
            shader,
            shadow_shader,
            constants,
            values,
            textures,
            samplers,
            constant_buffer_size,
        })
    }

    fn read_constant(cur: &mut ByteCursor, string_table: &[u8]) -> Result<EffectConstant, ParserError> {
        let name_offset = cur.read_u32()?;
        let name = EffectReader::table_string(string_table, name_offset)?;
        let offset = cur.read_u32()?;
        let size = cur.read_u32()?;
        if offset % REGISTER_WIDTH != 0 {
            return Err(ParserError::FormatError {
                reason: "Constant offset is not register (4-float) aligned",
            });
        }

        Ok(EffectConstant {
            name,
            offset,
            size,
            constant_type: cur.read_u8()?,
            dimension: cur.read_u8()?,
            elements: cur.read_u8()?,
            is_srgb: cur.read_u8()? != 0,
            is_autoregister: cur.read_u8()? != 0,
        })
    }

    fn read_texture(cur: &mut ByteCursor, string_table: &[u8]) -> Result<EffectTexture, ParserError> {
        let register_index = cur.read_u8()?;
        let name_offset = cur.read_u32()?;
        let name = EffectReader::table_string(string_table, name_offset)?;
        let texture_type = TextureType::try_from(cur.read_u8()?).map_err(|_| ParserError::FormatError {
            reason: "Unknown texture type",
        })?;
        let flags = cur.read_u8()?;

        Ok(EffectTexture {
            register_index,
            name,
            texture_type,
            flags,
        })
    }

    fn read_sampler(
        cur: &mut ByteCursor,
        string_table: &[u8],
        textures: &[EffectTexture],
    ) -> Result<EffectSampler, ParserError> {
        let register_index = cur.read_u8()?;
        let name = if cur.read_u8()? != 0 {
            let name_offset = cur.read_u32()?;
            Some(EffectReader::table_string(string_table, name_offset)?)
        } else {
            None
        };

        let filter = cur.read_u8()?;
        let mip_filter = cur.read_u8()?;
        let wrap_u = cur.read_u8()?;
        let wrap_v = cur.read_u8()?;
        let wrap_w = cur.read_u8()?;
        let max_anisotropy = cur.read_u8()?;
        let lod_bias = cur.read_f32()?;
        let border_color = cur.read_u32()?;
        let min_lod = cur.read_f32()?;
        let max_lod = cur.read_f32()?;

        // Pair with the texture on the same register to learn whether this
        // samples a 2D, cube or volume target.
        let sampler_type = match textures.iter().find(|tex| tex.register_index == register_index) {
            Some(texture) => texture.texture_type,
            None => {
                warn!("Sampler on register {} has no paired texture, assuming 2D", register_index);
                TextureType::TwoD
            }
        };

        Ok(EffectSampler {
            register_index,
            name,
            filter,
            mip_filter,
            wrap_u,
            wrap_v,
            wrap_w,
            max_anisotropy,
            lod_bias,
            border_color,
            min_lod,
            max_lod,
            sampler_type,
        })
    }

    fn read_parameter(cur: &mut ByteCursor, string_table: &[u8]) -> Result<EffectParameter, ParserError> {
        let name_offset = cur.read_u32()?;
        let name = EffectReader::table_string(string_table, name_offset)?;

        let annotation_count = cur.read_u8()?;
        let mut annotations = Vec::with_capacity(annotation_count as usize);
        for _ in 0..annotation_count {
            let annotation_name_offset = cur.read_u32()?;
            let annotation_name = EffectReader::table_string(string_table, annotation_name_offset)?;
            let value = match cur.read_u8()? {
                0 => AnnotationValue::Bool(cur.read_u8()? != 0),
                1 => AnnotationValue::Int(cur.read_i32()?),
                2 => AnnotationValue::Float(cur.read_f32()?),
                3 => {
                    let value_offset = cur.read_u32()?;
                    AnnotationValue::Str(EffectReader::table_string(string_table, value_offset)?)
                }
                _ => {
                    return Err(ParserError::FormatError {
                        reason: "Unknown annotation type",
                    });
                }
            };
            annotations.push(Annotation {
                name: annotation_name,
                value,
            });
        }

        Ok(EffectParameter { name, annotations })
    }

    /// Strings live in the trailing string table and are referenced by byte
    /// offset; the string runs to the next NUL.
    fn table_string(table: &[u8], offset: u32) -> Result<String, ParserError> {
        let start = offset as usize;
        if start >= table.len() {
            return Err(ParserError::FormatError {
                reason: "String offset points past the string table",
            });
        }
        let end = table[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .ok_or(ParserError::FormatError {
                reason: "String table entry is missing its terminator",
            })?;
        Ok(String::from_utf8(table[start..end].to_vec())?)
    }
}
