use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;

use crate::graph::source::SourceNode;

/// A GET against the URL built from a resource path. The normalized path
/// rides along so completions can be matched back to cache entries.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub path: String,
    pub url: String,
}

pub struct FetchCompletion {
    pub path: String,
    /// HTTP-style status; anything outside 2xx is a transport failure.
    pub status: u16,
    pub bytes: Vec<u8>,
    /// Some transports deliver a parsed document next to the raw bytes.
    pub document: Option<SourceNode>,
}

impl FetchCompletion {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fire-and-forget transport seam. `begin` must never decode or complete
/// inline; completions surface through `poll`, which the manager drains on
/// the frame tick. Every begun fetch eventually yields exactly one
/// completion, success or failure.
pub trait Fetcher {
    fn begin(&mut self, request: FetchRequest);
    fn poll(&mut self) -> Option<FetchCompletion>;
}

/// Shared handle, so a caller can keep inspecting a fetcher it handed off.
impl<F: Fetcher> Fetcher for Rc<RefCell<F>> {
    fn begin(&mut self, request: FetchRequest) {
        self.borrow_mut().begin(request)
    }

    fn poll(&mut self) -> Option<FetchCompletion> {
        self.borrow_mut().poll()
    }
}

/// In-memory transport for tests and bundled assets: registered payloads
/// complete with 200 on the next poll, anything else with 404.
#[derive(Default)]
pub struct MemoryFetcher {
    files: IndexMap<String, Vec<u8>>,
    completed: VecDeque<FetchCompletion>,
    /// Every URL a begin() was issued for, in order.
    pub requests: Vec<String>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(url.into(), bytes);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.iter().filter(|r| r.as_str() == url).count()
    }
}

impl Fetcher for MemoryFetcher {
    fn begin(&mut self, request: FetchRequest) {
        self.requests.push(request.url.clone());
        let completion = match self.files.get(&request.url).or_else(|| self.files.get(&request.path)) {
            Some(bytes) => FetchCompletion {
                path: request.path,
                status: 200,
                bytes: bytes.clone(),
                document: None,
            },
            None => {
                debug!("MemoryFetcher has no entry for {}", request.url);
                FetchCompletion {
                    path: request.path,
                    status: 404,
                    bytes: Vec::new(),
                    document: None,
                }
            }
        };
        self.completed.push_back(completion);
    }

    fn poll(&mut self) -> Option<FetchCompletion> {
        self.completed.pop_front()
    }
}
