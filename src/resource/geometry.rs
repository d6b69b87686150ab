use std::any::Any;

use log::warn;

use lodestream_files::geometry::reader::GeometryReader;
use lodestream_files::geometry::types::{GeometryAsset, IndexData};

use crate::device::BufferHandle;
use crate::resource::{PrepareContext, PrepareOutcome, Resource, ResourceCore, ResourceError, ResourceState};

/// GPU objects backing one decoded mesh. Meshes with no vertices stay
/// valid but get no buffers.
#[derive(Debug, Clone, Default)]
pub struct MeshBuffers {
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
}

/// Meshes, skeletons and animation curves decoded from a geometry
/// container, plus the GPU buffers created from them.
pub struct GeometryResource {
    core: ResourceCore,
    pub asset: Option<GeometryAsset>,
    pub buffers: Vec<MeshBuffers>,
    /// Whether decoded vertex/index arrays were kept CPU-side (blend
    /// shapes present, or the manager runs with a system mirror).
    pub cpu_mirror: bool,
}

impl GeometryResource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            core: ResourceCore::new(path),
            asset: None,
            buffers: Vec::new(),
            cpu_mirror: false,
        }
    }
}

impl Resource for GeometryResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) -> Result<PrepareOutcome, ResourceError> {
        let Some(payload) = self.core.take_payload() else {
            return Err(ResourceError::MissingPayload {
                path: self.core.path.clone(),
            });
        };

        // Malformed containers are a data quality issue: the resource goes
        // Bad, the frame loop keeps running.
        let mut asset = match GeometryReader::parse(&payload.bytes) {
            Ok(asset) => asset,
            Err(parse_error) => {
                warn!("{}: {}", self.core.path, ResourceError::Decode(parse_error));
                return Ok(PrepareOutcome::Done(false));
            }
        };

        self.buffers.clear();
        for mesh in &asset.meshes {
            let mut buffers = MeshBuffers::default();
            if !mesh.vertices.is_empty() {
                buffers.vertex_buffer =
                    Some(ctx.geometry_device.create_vertex_buffer(&mesh.vertices.declaration, &mesh.vertices.floats));
                if !mesh.indices.is_empty() {
                    buffers.index_buffer = Some(ctx.geometry_device.create_index_buffer(&mesh.indices));
                }
            }
            self.buffers.push(buffers);
        }

        self.cpu_mirror = ctx.system_mirror || asset.meshes.iter().any(|mesh| !mesh.blend_shapes.is_empty());
        if !self.cpu_mirror {
            for mesh in &mut asset.meshes {
                mesh.vertices.floats = Vec::new();
                mesh.indices = match mesh.indices {
                    IndexData::U16(_) => IndexData::U16(Vec::new()),
                    IndexData::U32(_) => IndexData::U32(Vec::new()),
                };
            }
        }

        self.asset = Some(asset);
        Ok(PrepareOutcome::Done(true))
    }

    fn unload(&mut self) -> bool {
        self.asset = None;
        self.buffers.clear();
        self.core.purged = true;
        self.core.state = ResourceState::Unloaded;
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
