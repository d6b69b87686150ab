use indexmap::IndexMap;
use log::{debug, trace};

use crate::resource::ResourceHandle;

/// Path-keyed store of every in-flight and loaded resource. At most one
/// live resource exists per normalized path; `add` overwrites, so callers
/// de-duplicate through `find` first.
#[derive(Default)]
pub struct MotherLode {
    resources: IndexMap<String, ResourceHandle>,
}

impl MotherLode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn find(&self, path: &str) -> Option<ResourceHandle> {
        self.resources.get(path).cloned()
    }

    pub fn add(&mut self, path: impl Into<String>, resource: ResourceHandle) {
        self.resources.insert(path.into(), resource);
    }

    pub fn remove(&mut self, path: &str) -> Option<ResourceHandle> {
        self.resources.shift_remove(path)
    }

    /// Drops all entries without unloading them; outstanding handles keep
    /// their data alive.
    pub fn clear(&mut self) {
        self.resources.clear();
    }

    pub fn unload_and_clear(&mut self) {
        for (path, handle) in self.resources.drain(..) {
            if !handle.borrow_mut().unload() {
                debug!("Unload of {} was refused during bulk clear", path);
            }
        }
    }

    /// Frame-windowed eviction sweep over unpinned entries. The distance
    /// check is modular over `frame_window`, which turns eviction into a
    /// rotating sweep across the window rather than an oldest-wins LRU;
    /// the wraparound behavior at the window boundary is part of the
    /// contract.
    pub fn purge_inactive(&mut self, frame: u64, frame_window: u64, frame_distance: u64) {
        self.resources.retain(|path, handle| {
            let mut resource = handle.borrow_mut();
            if resource.core().pinned() {
                return true;
            }
            if resource.core().purged {
                trace!("Dropping purged resource {}", path);
                return false;
            }
            if resource.core().is_good() {
                let distance = frame.wrapping_sub(resource.core().active_frame) % frame_window;
                if distance >= frame_distance {
                    if resource.unload() {
                        trace!("Purged inactive resource {} (distance {})", path, distance);
                        return false;
                    }
                    return true;
                }
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::MotherLode;
    use crate::resource::{
        PrepareContext, PrepareOutcome, Resource, ResourceCore, ResourceError, ResourceHandle, ResourceState,
    };

    struct Probe {
        core: ResourceCore,
        refuse_unload: bool,
        unload_calls: Rc<RefCell<u32>>,
    }

    impl Probe {
        fn handle(path: &str, active_frame: u64) -> ResourceHandle {
            let mut core = ResourceCore::new(path);
            core.state = ResourceState::Good;
            core.active_frame = active_frame;
            Rc::new(RefCell::new(Probe {
                core,
                refuse_unload: false,
                unload_calls: Rc::new(RefCell::new(0)),
            }))
        }
    }

    impl Resource for Probe {
        fn core(&self) -> &ResourceCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ResourceCore {
            &mut self.core
        }

        fn prepare(&mut self, _ctx: &mut PrepareContext) -> Result<PrepareOutcome, ResourceError> {
            Ok(PrepareOutcome::Done(true))
        }

        fn unload(&mut self) -> bool {
            *self.unload_calls.borrow_mut() += 1;
            if self.refuse_unload {
                return false;
            }
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

    #[test]
    fn purge_uses_the_modular_distance() {
        // window 1000, distance 30: frame 1029 active 1000 -> 29, retained;
        // frame 1030 active 1000 -> 30, evicted.
        let mut lode = MotherLode::new();
        lode.add("res:/a", Probe::handle("res:/a", 1000));
        lode.purge_inactive(1029, 1000, 30);
        assert_eq!(lode.len(), 1);
        lode.purge_inactive(1030, 1000, 30);
        assert!(lode.is_empty());
    }

    #[test]
    fn purge_wraps_around_the_window() {
        // The modular check is not an LRU: an entry 1010 frames stale has
        // distance (2010 - 1000) % 1000 = 10 < 30 and survives the sweep,
        // while the same entry at frame 2040 has distance 40 and goes.
        let mut lode = MotherLode::new();
        lode.add("res:/old", Probe::handle("res:/old", 1000));
        lode.purge_inactive(2010, 1000, 30);
        assert!(lode.find("res:/old").is_some());
        lode.purge_inactive(2040, 1000, 30);
        assert!(lode.find("res:/old").is_none());
    }

    #[test]
    fn pinned_entries_survive_the_sweep() {
        let mut lode = MotherLode::new();
        let handle = Probe::handle("res:/pinned", 0);
        handle.borrow_mut().core_mut().pin();
        lode.add("res:/pinned", handle.clone());
        lode.purge_inactive(5000, 1000, 30);
        assert_eq!(lode.len(), 1);

        handle.borrow_mut().core_mut().unpin();
        lode.purge_inactive(5000, 1000, 30);
        assert!(lode.is_empty());
    }

    #[test]
    fn refused_unload_keeps_the_entry() {
        let mut lode = MotherLode::new();
        let handle = Probe::handle("res:/stubborn", 0);
        {
            let mut resource = handle.borrow_mut();
            let probe = resource.as_any_mut().downcast_mut::<Probe>().unwrap();
            probe.refuse_unload = true;
        }
        lode.add("res:/stubborn", handle);
        lode.purge_inactive(5000, 1000, 30);
        assert_eq!(lode.len(), 1);
    }

    #[test]
    fn already_purged_entries_drop_without_unload() {
        let mut lode = MotherLode::new();
        let handle = Probe::handle("res:/gone", 0);
        let calls = {
            let mut resource = handle.borrow_mut();
            resource.core_mut().purged = true;
            let probe = resource.as_any_mut().downcast_mut::<Probe>().unwrap();
            probe.unload_calls.clone()
        };
        lode.add("res:/gone", handle);
        lode.purge_inactive(1, 1000, 30);
        assert!(lode.is_empty());
        assert_eq!(*calls.borrow(), 0);
    }
}
