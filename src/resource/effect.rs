use std::any::Any;

use log::{debug, warn};

use lodestream_files::effect::reader::EffectReader;
use lodestream_files::effect::types::{EffectAsset, StageAsset, StageType};

use crate::device::{ProgramHandle, SHADOW_PREFIX, ShaderBuildError, ShaderDevice};
use crate::resource::{PrepareContext, PrepareOutcome, Resource, ResourceCore, ResourceError, ResourceState};

/// Linked programs of one pass: the normal variant and the alpha-test
/// ("shadow") variant. The shadow program falls back to the normal one
/// when its build fails.
#[derive(Debug, Copy, Clone)]
pub struct PassPrograms {
    pub program: ProgramHandle,
    pub shadow_program: ProgramHandle,
}

pub struct EffectResource {
    core: ResourceCore,
    pub asset: Option<EffectAsset>,
    pub programs: Vec<PassPrograms>,
}

impl EffectResource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            core: ResourceCore::new(path),
            asset: None,
            programs: Vec::new(),
        }
    }

    /// Normal variant: the plain blobs, no prefix. Any failure here is
    /// fatal for the whole effect.
    fn link_pass(
        device: &mut dyn ShaderDevice,
        vertex: &StageAsset,
        fragment: &StageAsset,
    ) -> Result<ProgramHandle, ShaderBuildError> {
        let vs = device.compile(StageType::Vertex, &vertex.shader, "")?;
        let fs = device.compile(StageType::Fragment, &fragment.shader, "")?;
        device.link(vs, fs)
    }

    /// Shadow variant: dedicated blobs where present, otherwise the normal
    /// source compiled under the shadow preprocessor prefix.
    fn link_shadow_pass(
        device: &mut dyn ShaderDevice,
        vertex: &StageAsset,
        fragment: &StageAsset,
    ) -> Result<ProgramHandle, ShaderBuildError> {
        let vs = match &vertex.shadow_shader {
            Some(blob) => device.compile(StageType::Vertex, blob, "")?,
            None => device.compile(StageType::Vertex, &vertex.shader, SHADOW_PREFIX)?,
        };
        let fs = match &fragment.shadow_shader {
            Some(blob) => device.compile(StageType::Fragment, blob, "")?,
            None => device.compile(StageType::Fragment, &fragment.shader, SHADOW_PREFIX)?,
        };
        device.link(vs, fs)
    }
}

impl Resource for EffectResource {
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

        // An unsupported version or broken container never reaches program
        // compilation.
        let asset = match EffectReader::parse(&payload.bytes) {
            Ok(asset) => asset,
            Err(parse_error) => {
                warn!("{}: {}", self.core.path, ResourceError::Decode(parse_error));
                return Ok(PrepareOutcome::Done(false));
            }
        };

        self.programs.clear();
        for (pass_index, pass) in asset.passes.iter().enumerate() {
            let (Some(vertex), Some(fragment)) = (pass.stage(StageType::Vertex), pass.stage(StageType::Fragment))
            else {
                warn!(
                    "{}: pass {} is missing a vertex or fragment stage",
                    self.core.path, pass_index
                );
                return Ok(PrepareOutcome::Done(false));
            };

            let program = match Self::link_pass(ctx.shader_device, vertex, fragment) {
                Ok(program) => program,
                Err(build_error) => {
                    warn!(
                        "{}: {}",
                        self.core.path,
                        ResourceError::Shader {
                            path: self.core.path.clone(),
                            reason: build_error.reason,
                        }
                    );
                    return Ok(PrepareOutcome::Done(false));
                }
            };

            let shadow_program = match Self::link_shadow_pass(ctx.shader_device, vertex, fragment) {
                Ok(program) => program,
                Err(build_error) => {
                    debug!(
                        "{}: pass {} shadow variant failed ({}), reusing the normal program",
                        self.core.path, pass_index, build_error.reason
                    );
                    program
                }
            };

            self.programs.push(PassPrograms {
                program,
                shadow_program,
            });
        }

        self.asset = Some(asset);
        Ok(PrepareOutcome::Done(true))
    }

    fn unload(&mut self) -> bool {
        self.asset = None;
        self.programs.clear();
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
