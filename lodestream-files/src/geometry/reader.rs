use glam::{Mat3, Mat4, Quat, Vec3};
use log::warn;

use crate::ParserError;
use crate::cursor::ByteCursor;
use crate::geometry::types::{
    AnimationAsset, BlendShape, Bone, BoneFlags, Curve, CurveMask, GeometryAsset, IndexData, MeshArea, MeshAsset,
    MeshBinding, ModelAsset, TrackGroup, TransformTrack, VertexBaseType, VertexChannel, VertexData, VertexDeclaration,
};

const POSITION_DIMENSION: usize = 3;
const ORIENTATION_DIMENSION: usize = 4;
const SCALE_SHEAR_DIMENSION: usize = 9;

pub struct GeometryReader {}

impl GeometryReader {
    pub fn parse(data: &[u8]) -> Result<GeometryAsset, ParserError> {
        let mut cur = ByteCursor::new(data);

        let version = cur.read_u8()?;
        let mesh_count = cur.read_u8()?;
        let mut meshes = Vec::with_capacity(mesh_count as usize);
        for _ in 0..mesh_count {
            meshes.push(GeometryReader::read_mesh(&mut cur)?);
        }

        let model_count = cur.read_u8()?;
        let mut models = Vec::with_capacity(model_count as usize);
        for _ in 0..model_count {
            models.push(GeometryReader::read_model(&mut cur, &meshes)?);
        }

        let animation_count = cur.read_u8()?;
        let mut animations = Vec::with_capacity(animation_count as usize);
        for _ in 0..animation_count {
            animations.push(GeometryReader::read_animation(&mut cur)?);
        }

        Ok(GeometryAsset {
            version,
            meshes,
            models,
            animations,
        })
    }

    fn read_mesh(cur: &mut ByteCursor) -> Result<MeshAsset, ParserError> {
        let name = cur.read_string()?;
        let vertices = GeometryReader::read_vertex_block(cur)?;
        let indices = GeometryReader::read_index_block(cur)?;

        let area_count = cur.read_u8()?;
        let mut areas = Vec::with_capacity(area_count as usize);
        for _ in 0..area_count {
            areas.push(GeometryReader::read_area(cur, indices.element_size())?);
        }

        let binding_count = cur.read_u8()?;
        let mut bone_bindings = Vec::with_capacity(binding_count as usize);
        for _ in 0..binding_count {
            bone_bindings.push(cur.read_string()?);
        }

        let annotation_set_count = cur.read_u16()?;
        let mut blend_shapes = Vec::with_capacity(annotation_set_count as usize);
        for _ in 0..annotation_set_count {
            blend_shapes.push(BlendShape {
                name: cur.read_string()?,
                vertices: GeometryReader::read_vertex_block(cur)?,
            });
        }

        Ok(MeshAsset {
            name,
            vertices,
            indices,
            areas,
            bone_bindings,
            blend_shapes,
        })
    }

    fn read_vertex_block(cur: &mut ByteCursor) -> Result<VertexData, ParserError> {
        let decl_count = cur.read_u8()?;
        let mut channels = Vec::with_capacity(decl_count as usize);
        for _ in 0..decl_count {
            let channel = VertexChannel {
                usage: cur.read_u8()?,
                usage_index: cur.read_u8()?,
                file_type: cur.read_u8()?,
            };
            // Reject unknown encodings up front, before the vertex loop.
            if channel.base_type().is_none() {
                return Err(ParserError::UnknownVertexEncoding {
                    code: channel.file_type,
                });
            }
            channels.push(channel);
        }

        let declaration = VertexDeclaration { channels };
        let count = cur.read_u32()?;
        let mut floats = Vec::with_capacity(count as usize * declaration.stride());
        for _ in 0..count {
            for channel in &declaration.channels {
                let base = channel
                    .base_type()
                    .expect("channel encodings are validated above");
                for _ in 0..channel.components() {
                    floats.push(GeometryReader::read_component(cur, base, channel.is_normalized())?);
                }
            }
        }

        Ok(VertexData {
            declaration,
            count,
            floats,
        })
    }

    fn read_component(cur: &mut ByteCursor, base: VertexBaseType, normalized: bool) -> Result<f32, ParserError> {
        Ok(match base {
            VertexBaseType::Float32 => cur.read_f32()?,
            VertexBaseType::Float16 => cur.read_f16()?,
            VertexBaseType::UInt8 => {
                let v = cur.read_u8()? as f32;
                if normalized { v / 255.0 } else { v }
            }
            VertexBaseType::Int8 => {
                let v = cur.read_i8()? as f32;
                if normalized { v / 127.0 } else { v }
            }
            VertexBaseType::UInt16 => {
                let v = cur.read_u16()? as f32;
                if normalized { v / 65535.0 } else { v }
            }
            VertexBaseType::Int16 => {
                let v = cur.read_i16()? as f32;
                if normalized { v / 32767.0 } else { v }
            }
            VertexBaseType::UInt32 => cur.read_u32()? as f32,
            VertexBaseType::Int32 => cur.read_i32()? as f32,
        })
    }

    fn read_index_block(cur: &mut ByteCursor) -> Result<IndexData, ParserError> {
        let width_selector = cur.read_u8()?;
        let count = cur.read_u32()? as usize;
        match width_selector {
            0 => {
                let mut indices = Vec::with_capacity(count);
                for _ in 0..count {
                    indices.push(cur.read_u16()?);
                }
                Ok(IndexData::U16(indices))
            }
            1 => {
                let mut indices = Vec::with_capacity(count);
                for _ in 0..count {
                    indices.push(cur.read_u32()?);
                }
                Ok(IndexData::U32(indices))
            }
            _ => Err(ParserError::FormatError {
                reason: "Index width selector must be 0 (u16) or 1 (u32)",
            }),
        }
    }

    fn read_area(cur: &mut ByteCursor, index_element_size: usize) -> Result<MeshArea, ParserError> {
        let name = cur.read_string()?;
        let start = cur.read_u32()?;
        let count = cur.read_u32()?;
        let min = GeometryReader::read_vec3(cur)?;
        let max = GeometryReader::read_vec3(cur)?;
        Ok(MeshArea {
            name,
            start,
            count,
            // Always index-element units, so the offset scales with the
            // detected index width.
            byte_offset: start as usize * index_element_size,
            min,
            max,
        })
    }

    fn read_vec3(cur: &mut ByteCursor) -> Result<Vec3, ParserError> {
        Ok(Vec3::new(cur.read_f32()?, cur.read_f32()?, cur.read_f32()?))
    }

    fn read_model(cur: &mut ByteCursor, meshes: &[MeshAsset]) -> Result<ModelAsset, ParserError> {
        let name = cur.read_string()?;

        let bone_count = cur.read_u8()?;
        let mut bones = Vec::with_capacity(bone_count as usize);
        for _ in 0..bone_count {
            bones.push(GeometryReader::read_bone(cur)?);
        }
        GeometryReader::compute_bone_transforms(&mut bones)?;

        let binding_count = cur.read_u8()?;
        let mut mesh_bindings = Vec::with_capacity(binding_count as usize);
        for _ in 0..binding_count {
            let mesh_index = cur.read_u8()?;
            let mesh = meshes
                .get(mesh_index as usize)
                .ok_or(ParserError::FormatError {
                    reason: "Model mesh binding references a mesh index past the mesh table",
                })?;

            // A bone-binding name the skeleton does not know is a data
            // quality issue, not a decode failure.
            let mut bone_indices = Vec::with_capacity(mesh.bone_bindings.len());
            for binding_name in &mesh.bone_bindings {
                match bones.iter().position(|bone| &bone.name == binding_name) {
                    Some(index) => bone_indices.push(index),
                    None => warn!(
                        "Model {}: mesh {} binds unknown bone \"{}\", binding omitted",
                        name, mesh.name, binding_name
                    ),
                }
            }

            mesh_bindings.push(MeshBinding {
                mesh_index,
                bone_indices,
            });
        }

        Ok(ModelAsset {
            name,
            bones,
            mesh_bindings,
        })
    }

    fn read_bone(cur: &mut ByteCursor) -> Result<Bone, ParserError> {
        let name = cur.read_string()?;
        let parent_index = cur.read_i8()?;
        let flags = BoneFlags::from_bits(cur.read_u8()?).ok_or(ParserError::FormatError {
            reason: "Bone carries unknown transform flags",
        })?;

        let position = if flags.contains(BoneFlags::POSITION) {
            Some(GeometryReader::read_vec3(cur)?)
        } else {
            None
        };
        let orientation = if flags.contains(BoneFlags::ORIENTATION) {
            Some(Quat::from_xyzw(
                cur.read_f32()?,
                cur.read_f32()?,
                cur.read_f32()?,
                cur.read_f32()?,
            ))
        } else {
            None
        };
        let scale_shear = if flags.contains(BoneFlags::SCALE_SHEAR) {
            let mut m = [0.0f32; SCALE_SHEAR_DIMENSION];
            for value in m.iter_mut() {
                *value = cur.read_f32()?;
            }
            Some(Mat3::from_cols_array(&m))
        } else {
            None
        };

        Ok(Bone {
            name,
            parent_index,
            position,
            orientation,
            scale_shear,
            local_transform: Mat4::IDENTITY,
            world_transform: Mat4::IDENTITY,
            world_transform_inv: Mat4::IDENTITY,
        })
    }

    /// Local transforms first, then world transforms by composing with the
    /// parent's world transform. Parents precede children in the file, root
    /// bones (parent sentinel) use the local transform directly.
    fn compute_bone_transforms(bones: &mut [Bone]) -> Result<(), ParserError> {
        for index in 0..bones.len() {
            let bone = &bones[index];
            let mut local = Mat4::IDENTITY;
            if let Some(position) = bone.position {
                local *= Mat4::from_translation(position);
            }
            if let Some(orientation) = bone.orientation {
                local *= Mat4::from_quat(orientation);
            }
            if let Some(scale_shear) = bone.scale_shear {
                local *= Mat4::from_mat3(scale_shear);
            }

            let world = if bone.is_root() {
                local
            } else {
                let parent = bone.parent_index as usize;
                if parent >= index {
                    return Err(ParserError::FormatError {
                        reason: "Bone parent must precede the child in the skeleton",
                    });
                }
                bones[parent].world_transform * local
            };

            let bone = &mut bones[index];
            bone.local_transform = local;
            bone.world_transform = world;
            bone.world_transform_inv = world.inverse();
        }
        Ok(())
    }

    fn read_animation(cur: &mut ByteCursor) -> Result<AnimationAsset, ParserError> {
        let name = cur.read_string()?;
        let duration = cur.read_f32()?;

        let group_count = cur.read_u8()?;
        let mut groups = Vec::with_capacity(group_count as usize);
        for _ in 0..group_count {
            let model_name = cur.read_string()?;
            let track_count = cur.read_u8()?;
            let mut tracks = Vec::with_capacity(track_count as usize);
            for _ in 0..track_count {
                tracks.push(GeometryReader::read_track(cur)?);
            }
            groups.push(TrackGroup { model_name, tracks });
        }

        Ok(AnimationAsset {
            name,
            duration,
            groups,
        })
    }

    fn read_track(cur: &mut ByteCursor) -> Result<TransformTrack, ParserError> {
        let bone_name = cur.read_string()?;
        let mask = CurveMask::from_bits(cur.read_u8()?).ok_or(ParserError::FormatError {
            reason: "Transform track carries unknown curve flags",
        })?;

        let position = if mask.contains(CurveMask::POSITION) {
            Some(GeometryReader::read_curve(cur, POSITION_DIMENSION)?)
        } else {
            None
        };
        let orientation = if mask.contains(CurveMask::ORIENTATION) {
            let mut curve = GeometryReader::read_curve(cur, ORIENTATION_DIMENSION)?;
            GeometryReader::fix_quaternion_signs(&mut curve.controls);
            Some(curve)
        } else {
            None
        };
        let scale_shear = if mask.contains(CurveMask::SCALE_SHEAR) {
            Some(GeometryReader::read_curve(cur, SCALE_SHEAR_DIMENSION)?)
        } else {
            None
        };

        Ok(TransformTrack {
            bone_name,
            position,
            orientation,
            scale_shear,
        })
    }

    fn read_curve(cur: &mut ByteCursor, dimension: usize) -> Result<Curve, ParserError> {
        let degree = cur.read_u8()?;

        let knot_count = cur.read_u32()? as usize;
        let mut knots = Vec::with_capacity(knot_count);
        for _ in 0..knot_count {
            knots.push(cur.read_f32()?);
        }

        let control_count = cur.read_u32()? as usize;
        let mut controls = Vec::with_capacity(control_count * dimension);
        for _ in 0..control_count * dimension {
            controls.push(cur.read_f32()?);
        }

        Ok(Curve {
            degree,
            dimension,
            knots,
            controls,
        })
    }

    /// Negate any control quaternion whose dot product with its predecessor
    /// is negative, so slerp never takes the long way around.
    fn fix_quaternion_signs(controls: &mut [f32]) {
        for index in (ORIENTATION_DIMENSION..controls.len()).step_by(ORIENTATION_DIMENSION) {
            let dot: f32 = (0..ORIENTATION_DIMENSION)
                .map(|c| controls[index + c] * controls[index - ORIENTATION_DIMENSION + c])
                .sum();
            if dot < 0.0 {
                for c in 0..ORIENTATION_DIMENSION {
                    controls[index + c] = -controls[index + c];
                }
            }
        }
    }
}
