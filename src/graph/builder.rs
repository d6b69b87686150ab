use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;
use log::trace;

use crate::device::Clock;
use crate::graph::source::SourceNode;
use crate::graph::value::{DICT_TYPE, DictHandle, ListHandle, ObjectHandle, TypeRegistry, Value};
use crate::graph::GraphError;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BuildStep {
    /// Budget ran out; call `resume` again to continue.
    Suspended,
    Complete,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BuildPhase {
    Scanning,
    Initializing,
    Done,
}

#[derive(Clone)]
enum Container {
    Root,
    Object(ObjectHandle),
    Dict(DictHandle),
    List(ListHandle),
}

enum SlotKey {
    Name(String),
    Index(usize),
}

enum WorkItem {
    Node {
        node: SourceNode,
        parent: Container,
        key: SlotKey,
    },
    /// Marker pushed alongside a typed object; popping it queues the
    /// object for deferred initialization.
    Finish { object: ObjectHandle },
}

/// Walks a tagged source tree and materializes the typed object graph it
/// describes. The traversal lives on an explicit work stack, never the
/// call stack, which is what makes mid-graph suspension possible: `resume`
/// checks the clock after every popped entry and hands control back the
/// moment the budget is spent.
///
/// Initialization is decoupled from construction: objects wanting an
/// `initialize` call are collected during the walk and flushed, in
/// construction order, only after the whole graph exists.
pub struct ObjectGraphBuilder {
    registry: Rc<TypeRegistry>,
    stack: Vec<WorkItem>,
    ids: IndexMap<String, Value>,
    pending_initialize: VecDeque<ObjectHandle>,
    phase: BuildPhase,
    root: Option<Value>,
    run_initializers: bool,
}

impl ObjectGraphBuilder {
    pub fn new(registry: Rc<TypeRegistry>, document: SourceNode) -> Self {
        let mut builder = Self {
            registry,
            stack: Vec::new(),
            ids: IndexMap::new(),
            pending_initialize: VecDeque::new(),
            phase: BuildPhase::Scanning,
            root: None,
            run_initializers: true,
        };
        builder.stack.push(WorkItem::Node {
            key: SlotKey::Name(document.tag.clone()),
            node: document,
            parent: Container::Root,
        });
        builder
    }

    /// Skip the initialize phase entirely; construction still defers and
    /// records nothing.
    pub fn without_initializers(mut self) -> Self {
        self.run_initializers = false;
        self
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == BuildPhase::Done
    }

    /// The constructed root, once `resume` has returned `Complete`.
    pub fn root(&self) -> Option<Value> {
        self.root.clone()
    }

    pub fn resume(&mut self, clock: &dyn Clock, budget_seconds: f64) -> Result<BuildStep, GraphError> {
        let start = clock.now();
        loop {
            match self.phase {
                BuildPhase::Scanning => match self.stack.pop() {
                    Some(item) => self.step(item)?,
                    None => {
                        self.phase = if self.run_initializers {
                            BuildPhase::Initializing
                        } else {
                            BuildPhase::Done
                        };
                        continue;
                    }
                },
                BuildPhase::Initializing => match self.pending_initialize.pop_front() {
                    Some(object) => object.borrow_mut().initialize(),
                    None => {
                        self.phase = BuildPhase::Done;
                        continue;
                    }
                },
                BuildPhase::Done => return Ok(BuildStep::Complete),
            }

            if clock.now() - start >= budget_seconds {
                trace!(
                    "graph build suspended: {} stack entries, {} pending initializers",
                    self.stack.len(),
                    self.pending_initialize.len()
                );
                return Ok(BuildStep::Suspended);
            }
        }
    }

    fn step(&mut self, item: WorkItem) -> Result<(), GraphError> {
        let (mut node, parent, key) = match item {
            WorkItem::Finish { object } => {
                if object.borrow().wants_initialize() {
                    self.pending_initialize.push_back(object);
                }
                return Ok(());
            }
            WorkItem::Node { node, parent, key } => (node, parent, key),
        };

        if let Some(id) = node.attribute("ref") {
            let value = self
                .ids
                .get(id)
                .cloned()
                .ok_or_else(|| GraphError::UnresolvedRef { id: id.to_string() })?;
            self.assign(&parent, &key, value);
            return Ok(());
        }

        if let Some(tag) = node.attribute("type").map(str::to_owned) {
            if tag == DICT_TYPE {
                let dict: DictHandle = Rc::new(RefCell::new(IndexMap::new()));
                self.record_id(&node, Value::Dict(dict.clone()));
                self.assign(&parent, &key, Value::Dict(dict.clone()));
                self.push_children(&mut node, Container::Dict(dict));
            } else {
                let object = self
                    .registry
                    .create(&tag)
                    .ok_or(GraphError::UnknownType { tag })?;
                // Record the id before any child is processed so children
                // and later siblings can back-reference this instance.
                self.record_id(&node, Value::Object(object.clone()));
                self.assign(&parent, &key, Value::Object(object.clone()));
                self.push_children(&mut node, Container::Object(object.clone()));
                self.stack.push(WorkItem::Finish { object });
            }
            return Ok(());
        }

        if node.has_attribute("list") {
            let list: ListHandle = Rc::new(RefCell::new(vec![Value::Null; node.children.len()]));
            self.record_id(&node, Value::List(list.clone()));
            self.assign(&parent, &key, Value::List(list.clone()));
            // Descending slot indices, so the pops fill 0..n in order.
            for (index, child) in node.children.drain(..).enumerate().rev() {
                self.stack.push(WorkItem::Node {
                    node: child,
                    parent: Container::List(list.clone()),
                    key: SlotKey::Index(index),
                });
            }
            return Ok(());
        }

        let value = coerce_leaf(&node)?;
        self.record_id(&node, value.clone());
        self.assign(&parent, &key, value);
        Ok(())
    }

    /// Children go onto the stack in reverse so they pop, and therefore
    /// get processed, in original document order.
    fn push_children(&mut self, node: &mut SourceNode, container: Container) {
        for child in node.children.drain(..).rev() {
            self.stack.push(WorkItem::Node {
                key: SlotKey::Name(child.tag.clone()),
                node: child,
                parent: container.clone(),
            });
        }
    }

    fn record_id(&mut self, node: &SourceNode, value: Value) {
        if let Some(id) = node.attribute("id") {
            self.ids.insert(id.to_string(), value);
        }
    }

    fn assign(&mut self, parent: &Container, key: &SlotKey, value: Value) {
        match (parent, key) {
            (Container::Root, _) => self.root = Some(value),
            (Container::Object(object), SlotKey::Name(name)) => object.borrow_mut().set_slot(name, value),
            (Container::Object(object), SlotKey::Index(index)) => {
                object.borrow_mut().set_slot(&index.to_string(), value)
            }
            (Container::Dict(dict), SlotKey::Name(name)) => {
                dict.borrow_mut().insert(name.clone(), value);
            }
            (Container::Dict(dict), SlotKey::Index(index)) => {
                dict.borrow_mut().insert(index.to_string(), value);
            }
            (Container::List(list), SlotKey::Index(index)) => {
                let mut list = list.borrow_mut();
                if *index >= list.len() {
                    list.resize(*index + 1, Value::Null);
                }
                list[*index] = value;
            }
            (Container::List(list), SlotKey::Name(_)) => list.borrow_mut().push(value),
        }
    }
}

/// Leaf coercion, in order of attempt: explicit JSON payload (further
/// coerced to a float array unless marked `notnum`), then numeric literal,
/// then boolean literal, then the raw string.
fn coerce_leaf(node: &SourceNode) -> Result<Value, GraphError> {
    let text = node.text.trim();

    if node.has_attribute("json") {
        let parsed: serde_json::Value = serde_json::from_str(text)?;
        if !node.has_attribute("notnum") {
            if let Some(floats) = json_float_array(&parsed) {
                return Ok(Value::FloatArray(floats));
            }
        }
        return Ok(Value::Json(parsed));
    }

    if text.is_empty() {
        return Ok(Value::Null);
    }
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    if let Ok(float) = text.parse::<f64>() {
        return Ok(Value::Float(float));
    }
    match text.to_ascii_lowercase().as_str() {
        "enabled" | "true" | "yes" | "on" => return Ok(Value::Bool(true)),
        "disabled" | "false" | "no" | "off" => return Ok(Value::Bool(false)),
        _ => {}
    }
    Ok(Value::Str(text.to_string()))
}

fn json_float_array(value: &serde_json::Value) -> Option<Vec<f32>> {
    let array = value.as_array()?;
    array
        .iter()
        .map(|entry| entry.as_f64().map(|v| v as f32))
        .collect()
}
