//! Mutation-tracking ordered list.
//!
//! Position-changing operations keep the owning change tree's identity map
//! current, so an element that only moved is patched as a move record
//! instead of being re-sent.

use std::cell::RefCell;
use std::rc::Rc;

use crate::change_tree::{new_change_tree, ChangeTreeRef, DirtyKey};
use crate::observer::{ContainerCallback, ContainerObservers};
use crate::value::{attach, detach, Value};

pub type ListRef = Rc<RefCell<ListValue>>;

pub struct ListValue {
    items: Vec<Value>,
    change_tree: ChangeTreeRef,
    observers: ContainerObservers,
}

impl ListValue {
    pub fn new() -> ListRef {
        Rc::new(RefCell::new(ListValue {
            items: Vec::new(),
            change_tree: new_change_tree(),
            observers: ContainerObservers::default(),
        }))
    }

    pub fn change_tree(&self) -> &ChangeTreeRef {
        &self.change_tree
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    pub fn push(&mut self, value: Value) {
        let index = self.items.len() as u64;
        attach(&value, &self.change_tree, DirtyKey::Index(index));
        {
            let mut tree = self.change_tree.borrow_mut();
            if let Some(element) = value.element_id() {
                tree.assign_identity(element, DirtyKey::Index(index));
            }
            tree.mark_changed(DirtyKey::Index(index));
        }
        self.items.push(value);
    }

    /// Insert at `index`, shifting later elements up by one.
    pub fn insert(&mut self, index: usize, value: Value) {
        if index >= self.items.len() {
            self.push(value);
            return;
        }
        self.items.insert(index, value.clone());
        for shifted in index + 1..self.items.len() {
            self.rebind(shifted);
        }
        attach(&value, &self.change_tree, DirtyKey::Index(index as u64));
        let mut tree = self.change_tree.borrow_mut();
        if let Some(element) = value.element_id() {
            tree.assign_identity(element, DirtyKey::Index(index as u64));
        }
        tree.mark_changed(DirtyKey::Index(index as u64));
    }

    /// Overwrite the slot at `index`. The previous occupant keeps its
    /// identity entry until commit, so placing it back at another index in
    /// the same cycle is still recognized as a move; after commit the entry
    /// is dropped.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        let Some(current) = self.items.get(index) else {
            return false;
        };
        if current.same_as(&value) {
            return true;
        }
        detach(current);
        let replaced = current.element_id();
        attach(&value, &self.change_tree, DirtyKey::Index(index as u64));
        {
            let mut tree = self.change_tree.borrow_mut();
            if let Some(element) = replaced {
                tree.retire(element);
            }
            if let Some(element) = value.element_id() {
                let from = tree.identity_of(element).cloned();
                if let Some(from) = from {
                    if from != DirtyKey::Index(index as u64) {
                        tree.record_move(element, from);
                    }
                }
                tree.assign_identity(element, DirtyKey::Index(index as u64));
            }
            tree.mark_changed(DirtyKey::Index(index as u64));
        }
        self.items[index] = value;
        true
    }

    /// Remove the element at `index`, shifting later elements down by one.
    pub fn remove_at(&mut self, index: usize) -> Option<Value> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        detach(&removed);
        if let Some(element) = removed.element_id() {
            self.change_tree.borrow_mut().forget(element);
        }
        for shifted in index..self.items.len() {
            self.rebind(shifted);
        }
        self.change_tree.borrow_mut().touch();
        Some(removed)
    }

    pub fn pop(&mut self) -> Option<Value> {
        let removed = self.items.pop()?;
        detach(&removed);
        {
            let mut tree = self.change_tree.borrow_mut();
            if let Some(element) = removed.element_id() {
                tree.forget(element);
            }
            tree.touch();
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        let mut tree = self.change_tree.borrow_mut();
        for item in self.items.drain(..) {
            if let Some(inner) = item.change_tree() {
                inner.borrow_mut().clear_parent();
            }
            if let Some(element) = item.element_id() {
                tree.forget(element);
            }
        }
        tree.touch();
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b || a >= self.items.len() || b >= self.items.len() {
            return;
        }
        self.items.swap(a, b);
        self.rebind(a);
        self.rebind(b);
    }

    /// Re-point the element at `index` (identity, parent key, dirty mark)
    /// after it changed position.
    fn rebind(&mut self, index: usize) {
        let item = self.items[index].clone();
        let key = DirtyKey::Index(index as u64);
        if let Some(inner) = item.change_tree() {
            inner.borrow_mut().set_parent(&self.change_tree, key.clone());
        }
        let mut tree = self.change_tree.borrow_mut();
        if let Some(element) = item.element_id() {
            let from = tree.identity_of(element).cloned();
            if let Some(from) = from {
                if from != key {
                    tree.record_move(element, from);
                }
            }
            tree.assign_identity(element, key.clone());
        }
        tree.mark_changed(key);
    }

    pub fn on_add(&mut self, callback: ContainerCallback) {
        self.observers.on_add = Some(callback);
    }

    pub fn on_change(&mut self, callback: ContainerCallback) {
        self.observers.on_change = Some(callback);
    }

    pub fn on_remove(&mut self, callback: ContainerCallback) {
        self.observers.on_remove = Some(callback);
    }

    pub(crate) fn observers(&self) -> ContainerObservers {
        self.observers.clone()
    }

    /// Replay `on_add` for every current element, so an observer attached
    /// after the state arrived still sees the whole list.
    pub fn trigger_all(&self) {
        for (index, item) in self.items.iter().enumerate() {
            self.observers.notify_add(item, &DirtyKey::Index(index as u64));
        }
    }

    pub fn to_plain(&self) -> serde_json::Value {
        serde_json::Value::Array(self.items.iter().map(Value::to_plain).collect())
    }

    pub fn clone_list(&self) -> ListRef {
        let clone = ListValue::new();
        {
            let mut clone = clone.borrow_mut();
            for item in &self.items {
                clone.push(item.clone_value());
            }
        }
        clone
    }

    // Patch-application entry points; these never schedule re-encode.

    /// Drop elements past `total`, returning them with their old indices.
    pub(crate) fn apply_truncate(&mut self, total: usize) -> Vec<(Value, u64)> {
        let mut removed = Vec::new();
        while self.items.len() > total {
            let index = (self.items.len() - 1) as u64;
            if let Some(value) = self.items.pop() {
                detach(&value);
                removed.push((value, index));
            }
        }
        removed
    }

    pub(crate) fn apply_set(&mut self, index: usize, value: Value) {
        while self.items.len() < index {
            self.items.push(Value::Null);
        }
        if let Some(inner) = value.change_tree() {
            inner
                .borrow_mut()
                .set_parent(&self.change_tree, DirtyKey::Index(index as u64));
        }
        if let Some(element) = value.element_id() {
            let mut tree = self.change_tree.borrow_mut();
            tree.assign_identity(element, DirtyKey::Index(index as u64));
            tree.mark_committed(element);
        }
        if index < self.items.len() {
            detach(&self.items[index]);
            self.items[index] = value;
        } else {
            self.items.push(value);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.items.clone()
    }
}
