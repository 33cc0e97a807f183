//! Dynamic structured records.
//!
//! A [`Record`] is an instance of a registered [`SchemaType`]: a slot per
//! declared field, addressed by wire order. Every write routes through the
//! record's change tree, so mutating a record is what schedules it for the
//! next patch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::change_tree::{new_change_tree, ChangeTreeRef, DirtyKey};
use crate::error::RecordError;
use crate::observer::ListenCallback;
use crate::registry::{DeprecationPolicy, SchemaType};
use crate::types::FieldOrder;
use crate::value::{attach, detach, Value};

pub type RecordRef = Rc<RefCell<Record>>;

pub struct Record {
    schema: Rc<SchemaType>,
    values: Vec<Option<Value>>,
    change_tree: ChangeTreeRef,
    listeners: HashMap<FieldOrder, Vec<ListenCallback>>,
}

impl Record {
    pub fn new(schema: &Rc<SchemaType>) -> RecordRef {
        Rc::new(RefCell::new(Record {
            schema: schema.clone(),
            values: (0..schema.field_count()).map(|_| None).collect(),
            change_tree: new_change_tree(),
            listeners: HashMap::new(),
        }))
    }

    pub fn schema(&self) -> &Rc<SchemaType> {
        &self.schema
    }

    pub fn change_tree(&self) -> &ChangeTreeRef {
        &self.change_tree
    }

    /// Write a field by name. Assigning `None` to a populated field flags an
    /// explicit removal, which the next patch carries as a NIL.
    pub fn set(&mut self, field: &str, value: Option<Value>) -> Result<(), RecordError> {
        let descriptor = self.lookup(field)?;
        match descriptor.deprecated {
            Some(DeprecationPolicy::Throws) => {
                return Err(RecordError::DeprecatedField {
                    field: field.to_string(),
                })
            }
            Some(DeprecationPolicy::Ignore) => return Ok(()),
            None => {}
        }
        self.set_order(descriptor.order, value);
        Ok(())
    }

    /// Write a field by wire order, bypassing the deprecation policy.
    pub fn set_order(&mut self, order: FieldOrder, value: Option<Value>) {
        let slot = order as usize;
        match (&self.values[slot], &value) {
            (None, None) => return,
            (Some(current), Some(next)) if current.same_as(next) => return,
            _ => {}
        }

        if let Some(previous) = &self.values[slot] {
            detach(previous);
        }
        if let Some(next) = &value {
            attach(next, &self.change_tree, DirtyKey::Index(order as u64));
        }
        self.values[slot] = value;
        self.change_tree
            .borrow_mut()
            .mark_changed(DirtyKey::Index(order as u64));
    }

    pub fn get(&self, field: &str) -> Result<Option<&Value>, RecordError> {
        let descriptor = self.lookup(field)?;
        if descriptor.deprecated == Some(DeprecationPolicy::Throws) {
            return Err(RecordError::DeprecatedField {
                field: field.to_string(),
            });
        }
        if descriptor.deprecated == Some(DeprecationPolicy::Ignore) {
            return Ok(None);
        }
        Ok(self.values[descriptor.order as usize].as_ref())
    }

    pub fn get_order(&self, order: FieldOrder) -> Option<&Value> {
        self.values.get(order as usize).and_then(Option::as_ref)
    }

    /// Subscribe to one field: fires with `(new, previous)` whenever an
    /// incoming patch touches it.
    pub fn listen(&mut self, field: &str, callback: ListenCallback) -> Result<(), RecordError> {
        let order = self.lookup(field)?.order;
        self.listeners.entry(order).or_default().push(callback);
        Ok(())
    }

    pub(crate) fn listeners_for(&self, order: FieldOrder) -> Vec<ListenCallback> {
        self.listeners.get(&order).cloned().unwrap_or_default()
    }

    /// Store an incoming value without scheduling it for re-encode.
    pub(crate) fn apply_order(&mut self, order: FieldOrder, value: Option<Value>) {
        let slot = order as usize;
        if let Some(previous) = &self.values[slot] {
            detach(previous);
        }
        if let Some(next) = &value {
            if let Some(tree) = next.change_tree() {
                tree.borrow_mut()
                    .set_parent(&self.change_tree, DirtyKey::Index(order as u64));
            }
        }
        self.values[slot] = value;
    }

    /// Export as plain data, skipping deprecated and unset fields.
    pub fn to_plain(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for descriptor in self.schema.fields() {
            if descriptor.deprecated.is_some() {
                continue;
            }
            if let Some(value) = &self.values[descriptor.order as usize] {
                object.insert(descriptor.name.clone(), value.to_plain());
            }
        }
        serde_json::Value::Object(object)
    }

    /// Deep clone into a fresh, fully-dirty, unattached record.
    pub fn clone_record(&self) -> RecordRef {
        let clone = Record::new(&self.schema);
        {
            let mut clone = clone.borrow_mut();
            for (slot, value) in self.values.iter().enumerate() {
                if let Some(value) = value {
                    clone.set_order(slot as FieldOrder, Some(value.clone_value()));
                }
            }
        }
        clone
    }

    pub(crate) fn current_keys(&self) -> Vec<DirtyKey> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_some())
            .map(|(slot, _)| DirtyKey::Index(slot as u64))
            .collect()
    }

    pub(crate) fn child_values(&self) -> Vec<Value> {
        self.values.iter().flatten().cloned().collect()
    }

    fn lookup(&self, field: &str) -> Result<crate::registry::FieldDescriptor, RecordError> {
        self.schema
            .field_by_name(field)
            .cloned()
            .ok_or_else(|| RecordError::UnknownField {
                type_name: self.schema.name().to_string(),
                field: field.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldKind, PrimitiveKind, SchemaTypeBuilder, TypeRegistry};

    fn player_registry() -> (TypeRegistry, Rc<SchemaType>) {
        let mut registry = TypeRegistry::new();
        let id = registry
            .register(
                SchemaTypeBuilder::new("Player")
                    .field("name", FieldKind::Primitive(PrimitiveKind::Str))
                    .field("score", FieldKind::Primitive(PrimitiveKind::Number))
                    .deprecated_field(
                        "legacy",
                        FieldKind::Primitive(PrimitiveKind::Number),
                        DeprecationPolicy::Throws,
                    ),
            )
            .unwrap();
        let schema = registry.resolve(id).unwrap().clone();
        (registry, schema)
    }

    #[test]
    fn writes_mark_their_field_order() {
        let (_registry, schema) = player_registry();
        let player = Record::new(&schema);
        let mut player = player.borrow_mut();

        player.set("score", Some(Value::Number(10.0))).unwrap();

        let changed: Vec<_> = player
            .change_tree()
            .borrow()
            .changed_keys()
            .cloned()
            .collect();
        assert_eq!(changed, vec![DirtyKey::Index(1)]);
        assert_eq!(player.get("score").unwrap().unwrap().as_number(), Some(10.0));
    }

    #[test]
    fn equal_rewrites_are_no_ops() {
        let (_registry, schema) = player_registry();
        let player = Record::new(&schema);
        let mut player = player.borrow_mut();

        player.set("name", Some(Value::String("ann".into()))).unwrap();
        player.change_tree().borrow_mut().discard();

        player.set("name", Some(Value::String("ann".into()))).unwrap();
        assert!(!player.change_tree().borrow().has_changes());
    }

    #[test]
    fn unknown_fields_error_with_the_type_name() {
        let (_registry, schema) = player_registry();
        let player = Record::new(&schema);

        let result = player.borrow_mut().set("health", Some(Value::Number(1.0)));
        assert_eq!(
            result,
            Err(RecordError::UnknownField {
                type_name: "Player".into(),
                field: "health".into()
            })
        );
    }

    #[test]
    fn deprecated_fields_follow_their_policy() {
        let (_registry, schema) = player_registry();
        let player = Record::new(&schema);
        let mut player = player.borrow_mut();

        assert_eq!(
            player.set("legacy", Some(Value::Number(1.0))),
            Err(RecordError::DeprecatedField {
                field: "legacy".into()
            })
        );
        assert!(player.get("legacy").is_err());
    }

    #[test]
    fn to_plain_skips_deprecated_and_unset_fields() {
        let (_registry, schema) = player_registry();
        let player = Record::new(&schema);
        let mut player = player.borrow_mut();

        player.set("name", Some(Value::String("ann".into()))).unwrap();
        // `legacy` bypassed via order, `score` left unset.
        player.set_order(2, Some(Value::Number(9.0)));

        let plain = player.to_plain();
        assert_eq!(plain, serde_json::json!({ "name": "ann" }));
    }

    #[test]
    fn clone_is_deep_and_fully_dirty() {
        let (_registry, schema) = player_registry();
        let player = Record::new(&schema);
        player
            .borrow_mut()
            .set("name", Some(Value::String("ann".into())))
            .unwrap();
        player.borrow().change_tree().borrow_mut().discard();

        let clone = player.borrow().clone_record();
        assert!(clone.borrow().change_tree().borrow().has_changes());
        assert_eq!(
            clone.borrow().get("name").unwrap().unwrap().as_str(),
            Some("ann")
        );
        assert!(!Rc::ptr_eq(&player, &clone));
    }
}
