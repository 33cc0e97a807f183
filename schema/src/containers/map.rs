//! Mutation-tracking keyed map.
//!
//! Beyond the value table, a map carries the durable numeric identities its
//! committed keys travel under on the wire: after a key has been introduced
//! once, later patches reference it by a small integer instead of repeating
//! the string.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::change_tree::{new_change_tree, ChangeTreeRef, DirtyKey};
use crate::observer::{ContainerCallback, ContainerObservers};
use crate::value::{attach, detach, Value};

pub type MapRef = Rc<RefCell<MapValue>>;

pub struct MapValue {
    /// Keys in insertion order; drives iteration and the emission order of
    /// not-yet-committed keys.
    keys: Vec<String>,
    values: HashMap<String, Value>,
    /// Durable wire identity per committed key.
    identities: HashMap<String, u64>,
    by_identity: HashMap<u64, String>,
    next_identity: u64,
    change_tree: ChangeTreeRef,
    observers: ContainerObservers,
}

impl MapValue {
    pub fn new() -> MapRef {
        Rc::new(RefCell::new(MapValue {
            keys: Vec::new(),
            values: HashMap::new(),
            identities: HashMap::new(),
            by_identity: HashMap::new(),
            next_identity: 0,
            change_tree: new_change_tree(),
            observers: ContainerObservers::default(),
        }))
    }

    pub fn change_tree(&self) -> &ChangeTreeRef {
        &self.change_tree
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.keys.iter().filter_map(|key| self.values.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys
            .iter()
            .filter_map(|key| self.values.get(key).map(|value| (key.as_str(), value)))
    }

    pub fn set_key(&mut self, key: &str, value: Value) {
        if let Some(current) = self.values.get(key) {
            if current.same_as(&value) {
                return;
            }
            detach(current);
            if let Some(element) = current.element_id() {
                self.change_tree.borrow_mut().forget(element);
            }
        } else {
            self.keys.push(key.to_string());
        }
        attach(&value, &self.change_tree, DirtyKey::Key(key.to_string()));
        let element = value.element_id();
        self.values.insert(key.to_string(), value);
        let mut tree = self.change_tree.borrow_mut();
        if let Some(element) = element {
            tree.assign_identity(element, DirtyKey::Key(key.to_string()));
        }
        tree.unmark_deleted(&DirtyKey::Key(key.to_string()));
        tree.mark_changed(DirtyKey::Key(key.to_string()));
    }

    /// Remove a key. A committed key leaves a tombstone so the other side
    /// drops it too; a key that was never committed just vanishes.
    pub fn delete_key(&mut self, key: &str) -> bool {
        let Some(removed) = self.values.remove(key) else {
            return false;
        };
        self.keys.retain(|existing| existing != key);
        detach(&removed);
        let mut tree = self.change_tree.borrow_mut();
        if let Some(element) = removed.element_id() {
            tree.forget(element);
        }
        tree.mark_deleted(DirtyKey::Key(key.to_string()));
        true
    }

    /// Re-key an entry. When the value is a committed reference the next
    /// patch carries a move record, not a payload.
    pub fn rename_key(&mut self, old: &str, new: &str) -> bool {
        if old == new || !self.values.contains_key(old) {
            return false;
        }
        if self.values.contains_key(new) {
            self.delete_key(new);
        }
        let value = match self.values.remove(old) {
            Some(value) => value,
            None => return false,
        };
        if let Some(position) = self.keys.iter().position(|key| key == old) {
            self.keys[position] = new.to_string();
        }

        let element = value.element_id();
        let old_committed = self.identities.contains_key(old);
        if let Some(inner) = value.change_tree() {
            inner
                .borrow_mut()
                .set_parent(&self.change_tree, DirtyKey::Key(new.to_string()));
        }
        {
            let mut tree = self.change_tree.borrow_mut();
            if let Some(element) = element {
                tree.assign_identity(element, DirtyKey::Key(new.to_string()));
            }
            match element {
                Some(element) if old_committed => {
                    tree.record_move(element, DirtyKey::Key(old.to_string()));
                }
                // Primitive values cannot move; the old slot is torn down.
                None if old_committed => {
                    tree.mark_deleted(DirtyKey::Key(old.to_string()));
                }
                _ => {}
            }
            tree.mark_changed(DirtyKey::Key(new.to_string()));
        }
        self.values.insert(new.to_string(), value);
        true
    }

    pub fn clear(&mut self) {
        let mut tree = self.change_tree.borrow_mut();
        for key in self.keys.drain(..) {
            if let Some(value) = self.values.remove(&key) {
                if let Some(inner) = value.change_tree() {
                    inner.borrow_mut().clear_parent();
                }
                if let Some(element) = value.element_id() {
                    tree.forget(element);
                }
            }
            tree.mark_deleted(DirtyKey::Key(key));
        }
        tree.touch();
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

    /// Replay `on_add` for every current entry.
    pub fn trigger_all(&self) {
        for (key, value) in self.iter() {
            self.observers.notify_add(value, &DirtyKey::Key(key.to_string()));
        }
    }

    pub fn to_plain(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (key, value) in self.iter() {
            object.insert(key.to_string(), value.to_plain());
        }
        serde_json::Value::Object(object)
    }

    pub fn clone_map(&self) -> MapRef {
        let clone = MapValue::new();
        {
            let mut clone = clone.borrow_mut();
            for key in &self.keys {
                if let Some(value) = self.values.get(key) {
                    clone.set_key(key, value.clone_value());
                }
            }
        }
        clone
    }

    // Wire-identity bookkeeping, shared by the encoder's commit phase and
    // the decoder's first-sight assignment.

    pub(crate) fn identity_of_key(&self, key: &str) -> Option<u64> {
        self.identities.get(key).copied()
    }

    pub(crate) fn key_of_identity(&self, identity: u64) -> Option<&String> {
        self.by_identity.get(&identity)
    }

    pub(crate) fn assign_identity_for(&mut self, key: &str) -> u64 {
        let identity = self.next_identity;
        self.next_identity += 1;
        self.identities.insert(key.to_string(), identity);
        self.by_identity.insert(identity, key.to_string());
        identity
    }

    pub(crate) fn retire_key(&mut self, key: &str) {
        if let Some(identity) = self.identities.remove(key) {
            self.by_identity.remove(&identity);
        }
    }

    pub(crate) fn insertion_position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|existing| existing == key)
    }

    // Patch-application entry points; these never schedule re-encode.

    pub(crate) fn apply_set(&mut self, key: &str, value: Value) {
        if let Some(previous) = self.values.get(key) {
            detach(previous);
        } else {
            self.keys.push(key.to_string());
        }
        if let Some(inner) = value.change_tree() {
            inner
                .borrow_mut()
                .set_parent(&self.change_tree, DirtyKey::Key(key.to_string()));
        }
        if let Some(element) = value.element_id() {
            let mut tree = self.change_tree.borrow_mut();
            tree.assign_identity(element, DirtyKey::Key(key.to_string()));
            tree.mark_committed(element);
        }
        self.values.insert(key.to_string(), value);
    }

    pub(crate) fn apply_remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key)?;
        self.keys.retain(|existing| existing != key);
        detach(&removed);
        if let Some(element) = removed.element_id() {
            self.change_tree.borrow_mut().forget(element);
        }
        self.retire_key(key);
        Some(removed)
    }

    /// Rebind the entry at `from` under `to` without tearing it down.
    pub(crate) fn apply_move(&mut self, from: &str, to: &str) -> Option<Value> {
        let value = self.values.remove(from)?;
        self.keys.retain(|existing| existing != from);
        self.retire_key(from);
        self.apply_set(to, value.clone());
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(map: &MapValue) -> Vec<String> {
        map.change_tree()
            .borrow()
            .changed_keys()
            .filter_map(|key| key.as_key().map(str::to_string))
            .collect()
    }

    #[test]
    fn set_key_tracks_insertion_order() {
        let map = MapValue::new();
        let mut map = map.borrow_mut();

        map.set_key("b", Value::Number(2.0));
        map.set_key("a", Value::Number(1.0));

        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(changed(&map), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn delete_tombstones_the_key() {
        let map = MapValue::new();
        let mut map = map.borrow_mut();

        map.set_key("hp", Value::Number(100.0));
        map.change_tree().borrow_mut().discard();

        assert!(map.delete_key("hp"));
        assert!(!map.contains_key("hp"));
        assert!(map
            .change_tree()
            .borrow()
            .is_deleted(&DirtyKey::Key("hp".into())));
        assert!(!map.delete_key("hp"));
    }

    #[test]
    fn delete_then_reset_in_one_cycle_is_a_plain_change() {
        let map = MapValue::new();
        let mut map = map.borrow_mut();

        map.set_key("hp", Value::Number(100.0));
        map.delete_key("hp");
        map.set_key("hp", Value::Number(50.0));

        assert!(!map
            .change_tree()
            .borrow()
            .is_deleted(&DirtyKey::Key("hp".into())));
        assert_eq!(map.get("hp").unwrap().as_number(), Some(50.0));
    }

    #[test]
    fn identities_round_trip() {
        let map = MapValue::new();
        let mut map = map.borrow_mut();

        let first = map.assign_identity_for("a");
        let second = map.assign_identity_for("b");
        assert_eq!((first, second), (0, 1));
        assert_eq!(map.identity_of_key("b"), Some(1));
        assert_eq!(map.key_of_identity(0), Some(&"a".to_string()));

        map.retire_key("a");
        assert_eq!(map.key_of_identity(0), None);

        // Retired identities are never reused.
        assert_eq!(map.assign_identity_for("c"), 2);
    }

    #[test]
    fn rename_of_primitive_tears_down_the_old_slot() {
        let map = MapValue::new();
        let mut map = map.borrow_mut();

        map.set_key("old", Value::Number(7.0));
        map.assign_identity_for("old");
        map.change_tree().borrow_mut().discard();

        assert!(map.rename_key("old", "new"));
        assert!(map
            .change_tree()
            .borrow()
            .is_deleted(&DirtyKey::Key("old".into())));
        assert_eq!(map.get("new").unwrap().as_number(), Some(7.0));
        assert!(!map.contains_key("old"));
    }
}
