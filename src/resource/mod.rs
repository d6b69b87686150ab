//! Resource lifecycle shared by every loaded asset kind: state machine,
//! pinning, and the observer protocol dependents use to rebuild derived
//! GPU state exactly once per load.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use thiserror::Error;

use lodestream_files::ParserError;

use crate::device::{Clock, GeometryDevice, ShaderDevice};
use crate::graph::source::SourceNode;
use crate::graph::{GraphError, TypeRegistry};

pub mod cache;
pub mod effect;
pub mod fetch;
pub mod geometry;
pub mod loading;
pub mod manager;

pub use cache::MotherLode;
pub use effect::EffectResource;
pub use fetch::{FetchCompletion, FetchRequest, Fetcher, MemoryFetcher};
pub use geometry::GeometryResource;
pub use loading::LoadingObject;
pub use manager::ResourceManager;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Transport failure for {path} (status {status})")]
    Transport { path: String, status: u16 },

    #[error("Cannot determine a resource type for path {path}")]
    UnknownExtension { path: String },

    #[error("No resource factory registered for extension \"{ext}\"")]
    UnregisteredExtension { ext: String },

    #[error(transparent)]
    Decode(#[from] ParserError),

    #[error("Shader build failed for {path}: {reason}")]
    Shader { path: String, reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Resource {path} has no fetched payload to prepare")]
    MissingPayload { path: String },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResourceState {
    Unloaded,
    Loading,
    Preparing,
    Good,
    Bad,
}

/// Raw fetch result handed to `begin_prepare`. Some transports deliver a
/// pre-parsed document next to the bytes; decoders fall back to parsing
/// the bytes themselves when it is absent.
pub struct FetchPayload {
    pub bytes: Vec<u8>,
    pub document: Option<SourceNode>,
}

/// Dependents register to rebuild derived state when the underlying
/// resource changes. `release_cached_data` fires synchronously when a
/// (re)load starts, before the old data is discarded; `rebuild_cached_data`
/// fires synchronously once the prepare finishes, before new callers see
/// the resource as Good. It also fires on failure; observers must treat a
/// Bad resource as do-not-use.
pub trait ResourceObserver {
    fn release_cached_data(&mut self, resource: &ResourceCore);
    fn rebuild_cached_data(&mut self, resource: &ResourceCore);
}

pub type ObserverHandle = Rc<RefCell<dyn ResourceObserver>>;

enum Notify {
    Release,
    Rebuild,
}

pub struct ResourceCore {
    pub path: String,
    pub state: ResourceState,
    /// Set when the data was purged while consumers may still hold the
    /// handle; the next touch transparently triggers a reload.
    pub purged: bool,
    pub active_frame: u64,
    do_not_purge: u32,
    observers: Vec<Weak<RefCell<dyn ResourceObserver>>>,
    pending_payload: Option<FetchPayload>,
}

impl ResourceCore {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: ResourceState::Unloaded,
            purged: false,
            active_frame: 0,
            do_not_purge: 0,
            observers: Vec::new(),
            pending_payload: None,
        }
    }

    pub fn is_good(&self) -> bool {
        self.state == ResourceState::Good
    }

    /// Touches the activity frame and reports whether a purged resource
    /// needs to be re-fetched.
    pub fn keep_alive(&mut self, frame: u64) -> bool {
        self.active_frame = frame;
        self.purged
    }

    /// Pin against eviction. Must be balanced with `unpin`.
    pub fn pin(&mut self) {
        self.do_not_purge += 1;
    }

    pub fn unpin(&mut self) {
        debug_assert!(self.do_not_purge > 0, "unbalanced unpin on {}", self.path);
        self.do_not_purge = self.do_not_purge.saturating_sub(1);
    }

    pub fn pinned(&self) -> bool {
        self.do_not_purge > 0
    }

    pub fn register_notification(&mut self, observer: &ObserverHandle) {
        self.observers.push(Rc::downgrade(observer));
    }

    /// Marks the start of a (re)load: observers drop their derived state
    /// first, then the stale flags reset.
    pub fn on_load_started(&mut self) {
        self.notify(Notify::Release);
        self.state = ResourceState::Loading;
        self.purged = false;
    }

    pub fn notify_rebuild(&mut self) {
        self.notify(Notify::Rebuild);
    }

    fn notify(&mut self, kind: Notify) {
        self.observers.retain(|weak| weak.strong_count() > 0);
        let observers: Vec<ObserverHandle> = self.observers.iter().filter_map(Weak::upgrade).collect();
        for observer in observers {
            let mut observer = observer.borrow_mut();
            match kind {
                Notify::Release => observer.release_cached_data(self),
                Notify::Rebuild => observer.rebuild_cached_data(self),
            }
        }
    }

    pub fn stash_payload(&mut self, payload: FetchPayload) {
        self.pending_payload = Some(payload);
    }

    pub fn take_payload(&mut self) -> Option<FetchPayload> {
        self.pending_payload.take()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PrepareOutcome {
    /// Finished this frame; `true` means the resource turned out Good.
    Done(bool),
    /// Budget ran out mid-decode; call again next frame.
    More,
}

/// Everything a `prepare` call may need, threaded through explicitly
/// instead of process-global singletons.
pub struct PrepareContext<'a> {
    pub geometry_device: &'a mut dyn GeometryDevice,
    pub shader_device: &'a mut dyn ShaderDevice,
    pub registry: &'a Rc<TypeRegistry>,
    pub clock: &'a dyn Clock,
    /// Seconds left of this frame's parse budget.
    pub budget: f64,
    pub frame: u64,
    /// Force retention of decoded CPU-side geometry next to GPU buffers.
    pub system_mirror: bool,
}

pub trait Resource {
    fn core(&self) -> &ResourceCore;
    fn core_mut(&mut self) -> &mut ResourceCore;

    /// Accept the fetched payload; the actual decode happens later, under
    /// the frame budget.
    fn begin_prepare(&mut self, payload: FetchPayload) {
        self.core_mut().stash_payload(payload);
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) -> Result<PrepareOutcome, ResourceError>;

    /// Drop the loaded data and flag the resource purged. Returns whether
    /// the unload actually happened.
    fn unload(&mut self) -> bool;

    /// Transient resources (in-flight object constructions) leave the
    /// cache once they finish.
    fn transient(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type ResourceHandle = Rc<RefCell<dyn Resource>>;
