//! Seams towards the GPU layer and the host clock. The streaming core
//! never talks to a real device; the composition root injects these.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;

use lodestream_files::effect::types::StageType;
use lodestream_files::geometry::types::{IndexData, VertexDeclaration};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BufferHandle(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ShaderHandle(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ProgramHandle(pub u32);

#[derive(Error, Debug, Clone)]
#[error("shader build failed: {reason}")]
pub struct ShaderBuildError {
    pub reason: String,
}

/// Preprocessor prefix for the alpha-test variant when an effect ships no
/// dedicated shadow blob.
pub const SHADOW_PREFIX: &str = "#define SHADOW_PASS\n";

pub trait GeometryDevice {
    fn create_vertex_buffer(&mut self, declaration: &VertexDeclaration, data: &[f32]) -> BufferHandle;
    fn create_index_buffer(&mut self, indices: &IndexData) -> BufferHandle;
}

pub trait ShaderDevice {
    fn compile(&mut self, stage: StageType, source: &[u8], prefix: &str) -> Result<ShaderHandle, ShaderBuildError>;
    fn link(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, ShaderBuildError>;
}

/// Shared handles, so a caller can keep inspecting a device it handed off.
impl<D: GeometryDevice> GeometryDevice for Rc<RefCell<D>> {
    fn create_vertex_buffer(&mut self, declaration: &VertexDeclaration, data: &[f32]) -> BufferHandle {
        self.borrow_mut().create_vertex_buffer(declaration, data)
    }

    fn create_index_buffer(&mut self, indices: &IndexData) -> BufferHandle {
        self.borrow_mut().create_index_buffer(indices)
    }
}

impl<D: ShaderDevice> ShaderDevice for Rc<RefCell<D>> {
    fn compile(&mut self, stage: StageType, source: &[u8], prefix: &str) -> Result<ShaderHandle, ShaderBuildError> {
        self.borrow_mut().compile(stage, source, prefix)
    }

    fn link(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, ShaderBuildError> {
        self.borrow_mut().link(vertex, fragment)
    }
}

/// Monotonic seconds. The prepare loop and the graph builder only ever
/// look at differences, so the epoch is arbitrary.
pub trait Clock {
    fn now(&self) -> f64;
}

pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Deterministic clock for budget tests: every `now()` call advances time
/// by a fixed tick, so "one stack operation" costs a known amount.
pub struct StepClock {
    current: std::cell::Cell<f64>,
    tick: f64,
}

impl StepClock {
    pub fn new(tick: f64) -> Self {
        Self {
            current: std::cell::Cell::new(0.0),
            tick,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> f64 {
        let now = self.current.get();
        self.current.set(now + self.tick);
        now
    }
}

/// Records every device call without touching a GPU. Handles are handed
/// out sequentially so tests can assert pairing.
#[derive(Default)]
pub struct NullDevice {
    next_handle: u32,
    pub vertex_buffers: Vec<usize>,
    pub index_buffers: Vec<usize>,
    pub compiled: Vec<(StageType, String)>,
    pub linked: Vec<(ShaderHandle, ShaderHandle)>,
    /// Substrings that make `compile` fail, to exercise the shadow
    /// fallback and hard-failure paths.
    pub fail_sources_containing: Vec<String>,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl GeometryDevice for NullDevice {
    fn create_vertex_buffer(&mut self, declaration: &VertexDeclaration, data: &[f32]) -> BufferHandle {
        debug_assert!(declaration.stride() == 0 || data.len() % declaration.stride() == 0);
        self.vertex_buffers.push(data.len());
        BufferHandle(self.next())
    }

    fn create_index_buffer(&mut self, indices: &IndexData) -> BufferHandle {
        self.index_buffers.push(indices.len());
        BufferHandle(self.next())
    }
}

impl ShaderDevice for NullDevice {
    fn compile(&mut self, stage: StageType, source: &[u8], prefix: &str) -> Result<ShaderHandle, ShaderBuildError> {
        let text = String::from_utf8_lossy(source).into_owned();
        if self.fail_sources_containing.iter().any(|s| text.contains(s.as_str())) {
            return Err(ShaderBuildError {
                reason: format!("refused to compile {:?} stage", stage),
            });
        }
        self.compiled.push((stage, format!("{}{}", prefix, text)));
        Ok(ShaderHandle(self.next()))
    }

    fn link(&mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Result<ProgramHandle, ShaderBuildError> {
        self.linked.push((vertex, fragment));
        Ok(ProgramHandle(self.next()))
    }
}
