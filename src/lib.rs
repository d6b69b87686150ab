//! Asset-streaming core for a 3D asset renderer: turns opaque resource
//! paths into live, GPU-ready objects while bounding how much CPU time is
//! spent parsing per frame.
//!
//! The heavy lifting is split between `lodestream-files` (byte-exact
//! codecs for the geometry and effect containers) and this crate, which
//! owns the resource lifecycle: the path-keyed cache, the per-frame
//! prepare loop with its time budget, and the resumable object-graph
//! builder. Everything is single-threaded and cooperative; long-running
//! work yields once its budget is spent and resumes on a later frame.

pub mod device;
pub mod graph;
pub mod resource;
