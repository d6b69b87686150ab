use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, trace, warn};

use crate::device::{Clock, GeometryDevice, ShaderDevice};
use crate::graph::{TypeRegistry, Value};
use crate::resource::cache::MotherLode;
use crate::resource::fetch::{FetchRequest, Fetcher};
use crate::resource::loading::LoadingObject;
use crate::resource::{
    FetchPayload, PrepareContext, PrepareOutcome, Resource, ResourceError, ResourceHandle, ResourceState,
};

type ResourceFactory = Box<dyn Fn(&str) -> ResourceHandle>;

const DEFAULT_PREPARE_BUDGET: f64 = 0.010;
const DEFAULT_FRAME_WINDOW: u64 = 1000;
const DEFAULT_FRAME_DISTANCE: u64 = 30;
/// Purge sweeps run every fifth whole second of accumulated frame time.
const PURGE_FRAMES_PER_SWEEP: u64 = 5;

/// Front door of the streaming core. Owns the cache, the transport and
/// device seams, and the per-frame prepare loop that turns fetched bytes
/// into Good resources under a time budget.
pub struct ResourceManager {
    cache: MotherLode,
    extensions: IndexMap<String, ResourceFactory>,
    prefixes: IndexMap<String, String>,
    fetcher: Box<dyn Fetcher>,
    geometry_device: Box<dyn GeometryDevice>,
    shader_device: Box<dyn ShaderDevice>,
    registry: Rc<TypeRegistry>,
    clock: Box<dyn Clock>,
    prepare_queue: VecDeque<ResourceHandle>,
    pending_loads: usize,
    frame: u64,
    idle_frames: u64,
    prepare_budget: f64,
    pub auto_purge: bool,
    purge_time: f64,
    purge_frame_count: u64,
    frame_window: u64,
    frame_distance: u64,
    pub system_mirror: bool,
}

impl ResourceManager {
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        geometry_device: Box<dyn GeometryDevice>,
        shader_device: Box<dyn ShaderDevice>,
        clock: Box<dyn Clock>,
        registry: TypeRegistry,
    ) -> Self {
        Self {
            cache: MotherLode::new(),
            extensions: IndexMap::new(),
            prefixes: IndexMap::new(),
            fetcher,
            geometry_device,
            shader_device,
            registry: Rc::new(registry),
            clock,
            prepare_queue: VecDeque::new(),
            pending_loads: 0,
            frame: 0,
            idle_frames: 0,
            prepare_budget: DEFAULT_PREPARE_BUDGET,
            auto_purge: true,
            purge_time: 0.0,
            purge_frame_count: 0,
            frame_window: DEFAULT_FRAME_WINDOW,
            frame_distance: DEFAULT_FRAME_DISTANCE,
            system_mirror: false,
        }
    }

    /// Lowercased, forward-slashed form every cache key and fetch uses.
    /// Inline `str:/` documents pass through untouched, their payload is
    /// the path itself.
    pub fn normalize_path(path: &str) -> String {
        if path.starts_with("str:/") {
            return path.to_string();
        }
        path.to_ascii_lowercase().replace('\\', "/")
    }

    /// Maps `prefix:/rest` through the registered prefix table. Malformed
    /// or unknown prefixes are reported once and left untouched, which
    /// makes the failure visible at fetch time instead of silently here.
    pub fn build_url(&self, path: &str) -> String {
        let Some((prefix, rest)) = path.split_once(":/") else {
            warn!("Path {} carries no source prefix", path);
            return path.to_string();
        };
        match self.prefixes.get(prefix) {
            Some(base) => format!("{}{}", base, rest),
            None => {
                warn!("Unknown source prefix \"{}\" in {}", prefix, path);
                path.to_string()
            }
        }
    }

    pub fn register_prefix(&mut self, prefix: impl Into<String>, base_url: impl Into<String>) {
        self.prefixes.insert(prefix.into(), base_url.into());
    }

    pub fn register_extension<F>(&mut self, ext: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> ResourceHandle + 'static,
    {
        self.extensions.insert(ext.into(), Box::new(factory));
    }

    pub fn registry(&self) -> &Rc<TypeRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &MotherLode {
        &self.cache
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads
    }

    /// Consecutive frames with no fetch or prepare activity.
    pub fn idle_frames(&self) -> u64 {
        self.idle_frames
    }

    pub fn set_prepare_budget(&mut self, seconds: f64) {
        self.prepare_budget = seconds;
    }

    pub fn set_purge_window(&mut self, frame_window: u64, frame_distance: u64) {
        self.frame_window = frame_window;
        self.frame_distance = frame_distance;
    }

    /// The type tag deciding which factory builds the resource: the second
    /// segment for inline `str:/` paths, the file extension otherwise.
    fn extension_tag(path: &str) -> Option<&str> {
        if let Some(rest) = path.strip_prefix("str:/") {
            return rest.split('/').next().filter(|tag| !tag.is_empty());
        }
        let name = path.rsplit('/').next()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Cached handle for `path`, fetching and constructing on first use.
    /// A hit refreshes the activity frame; a purged hit transparently
    /// starts a reload.
    pub fn get_resource(&mut self, path: &str) -> Result<ResourceHandle, ResourceError> {
        let path = Self::normalize_path(path);

        if let Some(handle) = self.cache.find(&path) {
            let needs_reload = handle.borrow_mut().core_mut().keep_alive(self.frame);
            if needs_reload {
                self.issue_fetch(&path, &handle);
            }
            return Ok(handle);
        }

        let ext = Self::extension_tag(&path)
            .ok_or_else(|| ResourceError::UnknownExtension { path: path.clone() })?;
        let factory = self
            .extensions
            .get(ext)
            .ok_or_else(|| ResourceError::UnregisteredExtension { ext: ext.to_string() })?;

        let handle = factory(&path);
        self.cache.add(path.clone(), handle.clone());
        self.issue_fetch(&path, &handle);
        Ok(handle)
    }

    pub fn get_object<F>(&mut self, path: &str, callback: F) -> Result<ResourceHandle, ResourceError>
    where
        F: FnOnce(Value) + 'static,
    {
        self.request_object(path, true, Box::new(callback))
    }

    /// Like `get_object`, but the constructed graph skips the deferred
    /// initializer pass and the callback fires as soon as the graph is
    /// materialized.
    pub fn get_object_no_initialize<F>(&mut self, path: &str, callback: F) -> Result<ResourceHandle, ResourceError>
    where
        F: FnOnce(Value) + 'static,
    {
        self.request_object(path, false, Box::new(callback))
    }

    fn request_object(
        &mut self,
        path: &str,
        initialize: bool,
        callback: Box<dyn FnOnce(Value)>,
    ) -> Result<ResourceHandle, ResourceError> {
        let path = Self::normalize_path(path);

        // Concurrent requests for the same document ride one in-flight
        // construction.
        if let Some(handle) = self.cache.find(&path) {
            let mut resource = handle.borrow_mut();
            match resource.as_any_mut().downcast_mut::<LoadingObject>() {
                Some(loading) => loading.add_request(initialize, callback),
                None => {
                    // The request cannot attach to a plain resource, but
                    // the callback still fires exactly once.
                    warn!("{} is cached as a plain resource, not an object document", path);
                    drop(resource);
                    callback(Value::Null);
                    return Ok(handle);
                }
            }
            let needs_reload = resource.core_mut().keep_alive(self.frame);
            drop(resource);
            if needs_reload {
                self.issue_fetch(&path, &handle);
            }
            return Ok(handle);
        }

        let loading = Rc::new(RefCell::new(LoadingObject::new(path.clone())));
        loading.borrow_mut().add_request(initialize, callback);
        let handle: ResourceHandle = loading;
        self.cache.add(path.clone(), handle.clone());
        self.issue_fetch(&path, &handle);
        Ok(handle)
    }

    /// Forces a fresh fetch for purged, failed or evicted entries. A live
    /// entry is left alone.
    pub fn reload_resource(&mut self, path: &str) -> Result<ResourceHandle, ResourceError> {
        let path = Self::normalize_path(path);
        let Some(handle) = self.cache.find(&path) else {
            return self.get_resource(&path);
        };
        let stale = {
            let resource = handle.borrow();
            let core = resource.core();
            core.purged || matches!(core.state, ResourceState::Bad | ResourceState::Unloaded)
        };
        if stale {
            self.issue_fetch(&path, &handle);
        } else {
            trace!("reload_resource: {} is live, nothing to do", path);
        }
        Ok(handle)
    }

    fn issue_fetch(&mut self, path: &str, handle: &ResourceHandle) {
        handle.borrow_mut().core_mut().on_load_started();
        self.pending_loads += 1;
        self.fetcher.begin(FetchRequest {
            path: path.to_string(),
            url: self.build_url(path),
        });
    }

    /// One frame tick: drain transport completions, run the budgeted
    /// prepare queue, and advance the wall-time purge clock. `dt` is the
    /// frame delta in seconds.
    pub fn prepare_loop(&mut self, dt: f64) -> Result<(), ResourceError> {
        self.frame = self.frame.wrapping_add(1);
        let mut active = self.pending_loads > 0 || !self.prepare_queue.is_empty();

        while let Some(completion) = self.fetcher.poll() {
            active = true;
            self.pending_loads = self.pending_loads.saturating_sub(1);
            let Some(handle) = self.cache.find(&completion.path) else {
                // Interest was dropped while the fetch was in flight.
                debug!("Discarding completion for evicted path {}", completion.path);
                continue;
            };

            if completion.is_success() {
                let mut resource = handle.borrow_mut();
                resource.begin_prepare(FetchPayload {
                    bytes: completion.bytes,
                    document: completion.document,
                });
                resource.core_mut().state = ResourceState::Preparing;
                drop(resource);
                self.prepare_queue.push_back(handle);
            } else {
                warn!(
                    "{}",
                    ResourceError::Transport {
                        path: completion.path.clone(),
                        status: completion.status,
                    }
                );
                let transient = {
                    let mut resource = handle.borrow_mut();
                    if let Some(loading) = resource.as_any_mut().downcast_mut::<LoadingObject>() {
                        loading.fail();
                    }
                    resource.core_mut().state = ResourceState::Bad;
                    resource.core_mut().notify_rebuild();
                    resource.transient()
                };
                if transient {
                    self.cache.remove(&completion.path);
                }
            }
        }

        let start = self.clock.now();
        while let Some(handle) = self.prepare_queue.front().cloned() {
            let remaining = self.prepare_budget - (self.clock.now() - start);
            if remaining <= 0.0 {
                break;
            }
            active = true;

            let mut resource = handle.borrow_mut();
            let mut ctx = PrepareContext {
                geometry_device: &mut *self.geometry_device,
                shader_device: &mut *self.shader_device,
                registry: &self.registry,
                clock: &*self.clock,
                budget: remaining,
                frame: self.frame,
                system_mirror: self.system_mirror,
            };
            match resource.prepare(&mut ctx) {
                Ok(PrepareOutcome::Done(success)) => {
                    let core = resource.core_mut();
                    core.state = if success { ResourceState::Good } else { ResourceState::Bad };
                    core.active_frame = self.frame;
                    core.notify_rebuild();
                    let path = core.path.clone();
                    let transient = resource.transient();
                    drop(resource);
                    self.prepare_queue.pop_front();
                    if transient {
                        self.cache.remove(&path);
                    }
                }
                Ok(PrepareOutcome::More) => break,
                Err(error) => {
                    // Pop before propagating so a malformed asset cannot
                    // wedge the queue head forever.
                    let core = resource.core_mut();
                    core.state = ResourceState::Bad;
                    core.notify_rebuild();
                    let path = core.path.clone();
                    let transient = resource.transient();
                    drop(resource);
                    self.prepare_queue.pop_front();
                    if transient {
                        self.cache.remove(&path);
                    }
                    return Err(error);
                }
            }
        }

        if active {
            self.idle_frames = 0;
        } else {
            self.idle_frames += 1;
        }

        self.purge_time += dt;
        while self.purge_time >= 1.0 {
            self.purge_time -= 1.0;
            self.purge_frame_count += 1;
            if self.auto_purge && self.purge_frame_count % PURGE_FRAMES_PER_SWEEP == 0 {
                self.cache
                    .purge_inactive(self.frame, self.frame_window, self.frame_distance);
            }
        }

        Ok(())
    }
}
