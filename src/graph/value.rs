use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// Objects the builder can instantiate. Slots arrive in document order;
/// `initialize` is only ever called after the whole graph is materialized.
pub trait GraphObject: Any {
    fn type_tag(&self) -> &str;
    fn set_slot(&mut self, key: &str, value: Value);
    fn wants_initialize(&self) -> bool {
        false
    }
    fn initialize(&mut self) {}
    fn as_any(&self) -> &dyn Any;
}

pub type ObjectHandle = Rc<RefCell<dyn GraphObject>>;
pub type ListHandle = Rc<RefCell<Vec<Value>>>;
pub type DictHandle = Rc<RefCell<IndexMap<String, Value>>>;

/// The sentinel type tag for a plain associative container.
pub const DICT_TYPE: &str = "dict";

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FloatArray(Vec<f32>),
    Json(serde_json::Value),
    List(ListHandle),
    Dict(DictHandle),
    Object(ObjectHandle),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Value::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&DictHandle> {
        match self {
            Value::Dict(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListHandle> {
        match self {
            Value::List(handle) => Some(handle),
            _ => None,
        }
    }

    /// Structural equality through containers. Objects compare by identity,
    /// since two separately built graphs never share instances.
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::FloatArray(a), Value::FloatArray(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.deep_eq(vb))
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::Int(v) => write!(f, "Int({})", v),
            Value::Float(v) => write!(f, "Float({})", v),
            Value::Str(v) => write!(f, "Str({:?})", v),
            Value::FloatArray(v) => write!(f, "FloatArray({:?})", v),
            Value::Json(v) => write!(f, "Json({})", v),
            Value::List(v) => f.debug_tuple("List").field(&v.borrow()).finish(),
            Value::Dict(v) => f.debug_tuple("Dict").field(&v.borrow()).finish(),
            Value::Object(v) => write!(f, "Object(<{}>)", v.borrow().type_tag()),
        }
    }
}

/// Explicit, insertion-ordered mapping from type tags to factories. The
/// seam the render/animation/particle layers use to plug their own object
/// kinds into graph documents.
#[derive(Default)]
pub struct TypeRegistry {
    factories: IndexMap<String, Box<dyn Fn() -> ObjectHandle>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn() -> ObjectHandle + 'static,
    {
        self.factories.insert(tag.into(), Box::new(factory));
    }

    pub fn create(&self, tag: &str) -> Option<ObjectHandle> {
        self.factories.get(tag).map(|factory| factory())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }
}
