//! The dynamic value graph.
//!
//! Values form a shared mutable graph of `Rc<RefCell<…>>` nodes; object
//! identity is `Rc` pointer identity, which is also what the change-tracking
//! layer uses to detect moves versus replacements.

use std::rc::Rc;

use crate::change_tree::{ChangeTreeRef, DirtyKey};
use crate::containers::{ListRef, MapRef};
use crate::record::RecordRef;
use crate::types::ElementId;

#[derive(Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    /// An explicit null, distinct from an absent field.
    Null,
    Record(RecordRef),
    List(ListRef),
    Map(MapRef),
}

impl Value {
    /// Human-readable kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::Record(_) => "record",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Pointer identity for the reference variants.
    pub fn element_id(&self) -> Option<ElementId> {
        match self {
            Value::Record(record) => Some(ElementId(Rc::as_ptr(record) as usize)),
            Value::List(list) => Some(ElementId(Rc::as_ptr(list) as usize)),
            Value::Map(map) => Some(ElementId(Rc::as_ptr(map) as usize)),
            _ => None,
        }
    }

    /// Equality as the change tracker sees it: value equality for
    /// primitives, pointer equality for references.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn change_tree(&self) -> Option<ChangeTreeRef> {
        match self {
            Value::Record(record) => Some(record.borrow().change_tree().clone()),
            Value::List(list) => Some(list.borrow().change_tree().clone()),
            Value::Map(map) => Some(map.borrow().change_tree().clone()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Export as plain data. Records drop their deprecated fields.
    pub fn to_plain(&self) -> serde_json::Value {
        match self {
            Value::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::Boolean(value) => serde_json::Value::Bool(*value),
            Value::Null => serde_json::Value::Null,
            Value::Record(record) => record.borrow().to_plain(),
            Value::List(list) => list.borrow().to_plain(),
            Value::Map(map) => map.borrow().to_plain(),
        }
    }

    /// Deep clone. Reference variants get fresh instances with fresh change
    /// tracking, fully marked, so a clone can seed a new state graph.
    pub fn clone_value(&self) -> Value {
        match self {
            Value::Record(record) => Value::Record(record.borrow().clone_record()),
            Value::List(list) => Value::List(list.borrow().clone_list()),
            Value::Map(map) => Value::Map(map.borrow().clone_map()),
            other => other.clone(),
        }
    }

    /// Keys currently populated on this node (fields, indices, or map keys).
    pub(crate) fn current_keys(&self) -> Vec<DirtyKey> {
        match self {
            Value::Record(record) => record.borrow().current_keys(),
            Value::List(list) => (0..list.borrow().len() as u64).map(DirtyKey::Index).collect(),
            Value::Map(map) => map
                .borrow()
                .keys()
                .map(|key| DirtyKey::Key(key.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Values nested directly under this node.
    pub(crate) fn child_values(&self) -> Vec<Value> {
        match self {
            Value::Record(record) => record.borrow().child_values(),
            Value::List(list) => list.borrow().iter().cloned().collect(),
            Value::Map(map) => map.borrow().values().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Link `value` under `parent` at `key` and mark its whole subtree changed,
/// so the next encode carries it in full. Callers guard with an equality
/// check, so a value is only ever attached when its slot actually changed.
pub(crate) fn attach(value: &Value, parent: &ChangeTreeRef, key: DirtyKey) {
    let Some(tree) = value.change_tree() else {
        return;
    };
    tree.borrow_mut().set_parent(parent, key);
    mark_subtree(value);
}

/// Unlink `value` from its parent; it stops propagating dirtiness upward.
pub(crate) fn detach(value: &Value) {
    if let Some(tree) = value.change_tree() {
        tree.borrow_mut().clear_parent();
    }
}

fn mark_subtree(value: &Value) {
    let Some(tree) = value.change_tree() else {
        return;
    };
    {
        let mut tree = tree.borrow_mut();
        let keys = value.current_keys();
        tree.mark_all_changed(keys);
    }
    for child in value.child_values() {
        mark_subtree(&child);
    }
}
