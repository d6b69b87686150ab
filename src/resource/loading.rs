use std::any::Any;

use log::{debug, warn};

use crate::graph::builder::{BuildPhase, BuildStep, ObjectGraphBuilder};
use crate::graph::source::parse_document;
use crate::graph::Value;
use crate::resource::{PrepareContext, PrepareOutcome, Resource, ResourceCore, ResourceError, ResourceState};

type Callback = Box<dyn FnOnce(Value)>;

struct PendingRequest {
    initialize: bool,
    callback: Callback,
}

/// Transient resource standing in for an object graph while it is being
/// fetched and constructed. Every `get_object` call against the same path
/// attaches one request here; each callback fires exactly once, with the
/// constructed root or with `Value::Null` when the load failed. Requests
/// that opted out of initialization fire as soon as the graph is
/// materialized, without waiting for the initializer pass.
pub struct LoadingObject {
    core: ResourceCore,
    requests: Vec<PendingRequest>,
    builder: Option<ObjectGraphBuilder>,
    builder_runs_initializers: bool,
}

impl LoadingObject {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            core: ResourceCore::new(path),
            requests: Vec::new(),
            builder: None,
            builder_runs_initializers: false,
        }
    }

    pub fn add_request(&mut self, initialize: bool, callback: Callback) {
        if initialize && self.builder.is_some() && !self.builder_runs_initializers {
            // The build already started in no-initialize mode; the caller
            // gets the uninitialized graph rather than a second build.
            warn!(
                "{}: initialize requested after a no-initialize build started",
                self.core.path
            );
        }
        self.requests.push(PendingRequest { initialize, callback });
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Load failed before construction started; every waiting callback
    /// still fires, with `Value::Null`.
    pub fn fail(&mut self) {
        self.flush_requests(false, &None);
    }

    fn flush_requests(&mut self, only_no_initialize: bool, root: &Option<Value>) {
        let mut kept = Vec::new();
        for request in self.requests.drain(..) {
            if only_no_initialize && request.initialize {
                kept.push(request);
                continue;
            }
            (request.callback)(root.clone().unwrap_or(Value::Null));
        }
        self.requests = kept;
    }
}

impl Resource for LoadingObject {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) -> Result<PrepareOutcome, ResourceError> {
        if self.builder.is_none() {
            let Some(payload) = self.core.take_payload() else {
                return Err(ResourceError::MissingPayload {
                    path: self.core.path.clone(),
                });
            };

            let document = match payload.document {
                Some(document) => document,
                None => match parse_document(&payload.bytes) {
                    Ok(document) => document,
                    Err(parse_error) => {
                        // Waiting callers are released before the error
                        // surfaces; each callback still fires exactly once.
                        self.flush_requests(false, &None);
                        return Err(ResourceError::Graph(parse_error));
                    }
                },
            };

            self.builder_runs_initializers = self.requests.iter().any(|request| request.initialize);
            let builder = ObjectGraphBuilder::new(ctx.registry.clone(), document);
            self.builder = Some(if self.builder_runs_initializers {
                builder
            } else {
                builder.without_initializers()
            });
        }

        let builder = self.builder.as_mut().ok_or(ResourceError::MissingPayload {
            path: self.core.path.clone(),
        })?;

        // Unknown type tags and unresolved refs are configuration errors,
        // not data quality issues: release the callers, then propagate.
        let step = match builder.resume(ctx.clock, ctx.budget) {
            Ok(step) => step,
            Err(build_error) => {
                self.flush_requests(false, &None);
                return Err(ResourceError::Graph(build_error));
            }
        };

        match step {
            BuildStep::Suspended => {
                // The graph exists once scanning finished; callers that
                // skipped initialization need not wait for the rest.
                if builder.phase() != BuildPhase::Scanning {
                    let root = builder.root();
                    self.flush_requests(true, &root);
                }
                Ok(PrepareOutcome::More)
            }
            BuildStep::Complete => {
                let root = builder.root();
                if root.is_none() {
                    debug!("{}: document produced no root object", self.core.path);
                }
                self.flush_requests(false, &root);
                Ok(PrepareOutcome::Done(root.is_some()))
            }
        }
    }

    fn unload(&mut self) -> bool {
        self.builder = None;
        self.core.purged = true;
        self.core.state = ResourceState::Unloaded;
        true
    }

    fn transient(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
