//! Patch encoding and decoding.
//!
//! An [`Encoder`] walks a record graph guided by the change trees and
//! produces a byte patch; a [`Decoder`] applies a patch to a mirror graph in
//! place. Only a successful incremental, unfiltered encode commits: it
//! discards the change trees and assigns durable map identities. Full and
//! filtered passes read the same state but leave all bookkeeping untouched,
//! so they can run between incremental passes without corrupting them.

use log::warn;

use mirror_serde::{
    is_string_lead, read_bool, read_fixed, read_number, read_string, read_uint, write_bool,
    write_fixed, write_number, write_string, write_uint, ByteReader, ByteWriter, SerdeErr,
    END_OF_STRUCTURE, MOVE, NIL, TYPE_ID,
};

use crate::change_tree::{ChangeTreeRef, DirtyKey};
use crate::containers::{ListRef, ListValue, MapRef, MapValue};
use crate::error::{DecodeError, EncodeError};
use crate::observer::{run_callback, ContainerObservers, ListenCallback};
use crate::record::{Record, RecordRef};
use crate::registry::{ElementKind, FieldDescriptor, FieldKind, PrimitiveKind, TypeRegistry};
use crate::types::{RecipientId, TypeId};
use crate::value::Value;

#[derive(Clone, Copy)]
struct Pass {
    full: bool,
    recipient: Option<RecipientId>,
}

impl Pass {
    fn commits(&self) -> bool {
        !self.full && self.recipient.is_none()
    }
}

/// Side effects deferred until the whole pass has succeeded, so a failed
/// encode leaves every change tree intact.
#[derive(Default)]
struct CommitLog {
    trees: Vec<ChangeTreeRef>,
    maps: Vec<MapCommit>,
}

struct MapCommit {
    map: MapRef,
    /// Keys first emitted literally this pass, in emission order.
    introduced: Vec<String>,
    /// Keys whose identity is released (tombstoned or moved away from).
    retired: Vec<String>,
}

pub struct Encoder<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> Encoder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Encode pending changes and commit them on success.
    pub fn encode_incremental(&self, root: &RecordRef) -> Result<Vec<u8>, EncodeError> {
        self.encode(root, false, None)
    }

    /// Encode the entire current state. Never commits.
    pub fn encode_full(&self, root: &RecordRef) -> Result<Vec<u8>, EncodeError> {
        self.encode(root, true, None)
    }

    /// Encode pending changes visible to one recipient. Never commits.
    pub fn encode_filtered(
        &self,
        root: &RecordRef,
        recipient: RecipientId,
    ) -> Result<Vec<u8>, EncodeError> {
        self.encode(root, false, Some(recipient))
    }

    pub fn encode(
        &self,
        root: &RecordRef,
        full: bool,
        recipient: Option<RecipientId>,
    ) -> Result<Vec<u8>, EncodeError> {
        let pass = Pass { full, recipient };
        let mut writer = ByteWriter::new();
        let mut commit = CommitLog::default();
        self.encode_record(&mut writer, root, true, pass, &mut commit)?;

        if pass.commits() {
            for entry in &commit.maps {
                let mut map = entry.map.borrow_mut();
                for key in &entry.retired {
                    map.retire_key(key);
                }
                for key in &entry.introduced {
                    map.assign_identity_for(key);
                }
            }
            for tree in &commit.trees {
                tree.borrow_mut().discard();
            }
        }
        Ok(writer.to_bytes())
    }

    fn encode_record(
        &self,
        writer: &mut ByteWriter,
        record: &RecordRef,
        root: bool,
        pass: Pass,
        commit: &mut CommitLog,
    ) -> Result<(), EncodeError> {
        // Snapshot under a short borrow; user code is never re-entered here,
        // but nested encodes borrow their own cells.
        let (schema, entries, tree) = {
            let record = record.borrow();
            let tree = record.change_tree().clone();
            let orders: Vec<u64> = {
                let tree = tree.borrow();
                if pass.full {
                    tree.all_keys().filter_map(DirtyKey::as_index).collect()
                } else {
                    tree.changed_keys().filter_map(DirtyKey::as_index).collect()
                }
            };
            let entries: Vec<(u64, Option<Value>)> = orders
                .into_iter()
                .map(|order| (order, record.get_order(order as u8).cloned()))
                .collect();
            (record.schema().clone(), entries, tree)
        };

        for (order, value) in entries {
            let Some(descriptor) = schema.field(order as u8) else {
                continue;
            };
            let descriptor = descriptor.clone();

            if let (Some(recipient), Some(filter), Some(value)) =
                (pass.recipient, &descriptor.filter, &value)
            {
                if !filter(recipient, value, record) {
                    continue;
                }
            }

            match value {
                None => {
                    writer.write_u8(NIL);
                    write_uint(writer, order);
                }
                Some(Value::Null)
                    if !matches!(descriptor.kind, FieldKind::Primitive(_)) =>
                {
                    writer.write_u8(NIL);
                    write_uint(writer, order);
                }
                Some(value) => {
                    write_uint(writer, order);
                    self.encode_field(writer, &descriptor, &value, pass, commit)?;
                }
            }
        }

        if !root {
            writer.write_u8(END_OF_STRUCTURE);
        }
        commit.trees.push(tree);
        Ok(())
    }

    fn encode_field(
        &self,
        writer: &mut ByteWriter,
        descriptor: &FieldDescriptor,
        value: &Value,
        pass: Pass,
        commit: &mut CommitLog,
    ) -> Result<(), EncodeError> {
        match descriptor.kind {
            FieldKind::Primitive(kind) => {
                self.encode_primitive(writer, kind, value, &descriptor.name)
            }
            FieldKind::Reference(declared) => {
                self.encode_reference(writer, declared, value, &descriptor.name, pass, commit)
            }
            FieldKind::ListOf(element) => {
                let Value::List(list) = value else {
                    return Err(EncodeError::TypeMismatch {
                        expected: "list".to_string(),
                        found: value.kind_name().to_string(),
                        field: descriptor.name.clone(),
                    });
                };
                self.encode_list(writer, list, element, &descriptor.name, pass, commit)
            }
            FieldKind::MapOf(element) => {
                let Value::Map(map) = value else {
                    return Err(EncodeError::TypeMismatch {
                        expected: "map".to_string(),
                        found: value.kind_name().to_string(),
                        field: descriptor.name.clone(),
                    });
                };
                self.encode_map(writer, map, element, &descriptor.name, pass, commit)
            }
        }
    }

    fn encode_primitive(
        &self,
        writer: &mut ByteWriter,
        kind: PrimitiveKind,
        value: &Value,
        field: &str,
    ) -> Result<(), EncodeError> {
        match kind {
            PrimitiveKind::Str => {
                let text = match value {
                    Value::String(text) => text.as_str(),
                    // An explicit null reads back as the empty string.
                    Value::Null => "",
                    other => {
                        return Err(EncodeError::ValueType {
                            expected: "string",
                            found: other.kind_name(),
                            field: field.to_string(),
                        })
                    }
                };
                write_string(writer, text);
            }
            PrimitiveKind::Boolean => {
                let Value::Boolean(flag) = value else {
                    return Err(EncodeError::ValueType {
                        expected: "boolean",
                        found: value.kind_name(),
                        field: field.to_string(),
                    });
                };
                write_bool(writer, *flag);
            }
            numeric => {
                let Value::Number(number) = value else {
                    return Err(EncodeError::ValueType {
                        expected: numeric.tag(),
                        found: value.kind_name(),
                        field: field.to_string(),
                    });
                };
                let number = sanitize_number(*number, field);
                match numeric.fixed_width() {
                    Some(width) => write_fixed(writer, width, number),
                    None => write_number(writer, number),
                }
            }
        }
        Ok(())
    }

    fn encode_reference(
        &self,
        writer: &mut ByteWriter,
        declared: TypeId,
        value: &Value,
        field: &str,
        pass: Pass,
        commit: &mut CommitLog,
    ) -> Result<(), EncodeError> {
        let declared_type = self.registry.resolve(declared)?;
        let Value::Record(child) = value else {
            return Err(EncodeError::TypeMismatch {
                expected: declared_type.name().to_string(),
                found: value.kind_name().to_string(),
                field: field.to_string(),
            });
        };
        let concrete = child.borrow().schema().id();
        if !self.registry.is_subtype_of(concrete, declared) {
            return Err(EncodeError::TypeMismatch {
                expected: declared_type.name().to_string(),
                found: child.borrow().schema().name().to_string(),
                field: field.to_string(),
            });
        }
        if concrete != declared {
            writer.write_u8(TYPE_ID);
            writer.write_u8(concrete);
        }
        self.encode_record(writer, child, false, pass, commit)
    }

    fn encode_list(
        &self,
        writer: &mut ByteWriter,
        list: &ListRef,
        element: ElementKind,
        field: &str,
        pass: Pass,
        commit: &mut CommitLog,
    ) -> Result<(), EncodeError> {
        let (total, entries, tree) = {
            let list = list.borrow();
            let tree = list.change_tree().clone();
            let total = list.len() as u64;
            let indices: Vec<u64> = if pass.full {
                (0..total).collect()
            } else {
                let tree = tree.borrow();
                tree.changed_keys()
                    .filter_map(DirtyKey::as_index)
                    .filter(|index| *index < total)
                    .collect()
            };
            let entries: Vec<(u64, Value, Option<u64>)> = indices
                .into_iter()
                .filter_map(|index| {
                    let item = list.get(index as usize)?.clone();
                    let moved_from = if pass.full {
                        None
                    } else {
                        item.element_id()
                            .and_then(|element| tree.borrow().pending_move(element).cloned())
                            .and_then(|from| from.as_index())
                    };
                    Some((index, item, moved_from))
                })
                .collect();
            (total, entries, tree)
        };

        write_uint(writer, total);
        write_uint(writer, entries.len() as u64);
        for (index, item, moved_from) in entries {
            write_uint(writer, index);
            if let Some(previous) = moved_from {
                writer.write_u8(MOVE);
                write_uint(writer, previous);
            }
            self.encode_element(writer, element, &item, field, pass, commit)?;
        }
        commit.trees.push(tree);
        Ok(())
    }

    fn encode_map(
        &self,
        writer: &mut ByteWriter,
        map: &MapRef,
        element: ElementKind,
        field: &str,
        pass: Pass,
        commit: &mut CommitLog,
    ) -> Result<(), EncodeError> {
        struct Entry {
            key: String,
            value: Option<Value>,
            identity: Option<u64>,
            deleted: bool,
            position: Option<usize>,
            move_from: Option<(String, u64)>,
        }

        let (mut entries, tree) = {
            let map = map.borrow();
            let tree = map.change_tree().clone();
            let keys: Vec<String> = if pass.full {
                map.keys().map(str::to_string).collect()
            } else {
                let tree = tree.borrow();
                tree.changed_keys()
                    .filter_map(|key| key.as_key().map(str::to_string))
                    .collect()
            };

            let mut entries = Vec::new();
            for key in keys {
                let dirty = DirtyKey::Key(key.clone());
                let identity = map.identity_of_key(&key);
                if !pass.full && tree.borrow().is_deleted(&dirty) {
                    // A key never committed needs no tombstone.
                    if let Some(identity) = identity {
                        entries.push(Entry {
                            key,
                            value: None,
                            identity: Some(identity),
                            deleted: true,
                            position: None,
                            move_from: None,
                        });
                    }
                    continue;
                }
                // Stale entries (renamed away within this cycle) are skipped.
                let Some(value) = map.get(&key).cloned() else {
                    continue;
                };
                let move_from = if pass.full || identity.is_some() {
                    None
                } else {
                    value
                        .element_id()
                        .and_then(|element| tree.borrow().pending_move(element).cloned())
                        .and_then(|from| from.as_key().map(str::to_string))
                        .and_then(|old| map.identity_of_key(&old).map(|id| (old, id)))
                };
                entries.push(Entry {
                    position: map.insertion_position(&key),
                    key,
                    value: Some(value),
                    identity,
                    deleted: false,
                    move_from,
                });
            }
            (entries, tree)
        };

        // Committed keys first, in identity order; new keys follow in
        // insertion order. This is what keeps both sides assigning the same
        // numbers to the same keys.
        entries.sort_by_key(|entry| match entry.identity {
            Some(identity) => (0u8, identity),
            None => (1u8, entry.position.unwrap_or(usize::MAX) as u64),
        });

        let mut introduced = Vec::new();
        let mut retired = Vec::new();

        write_uint(writer, entries.len() as u64);
        for entry in entries {
            if entry.deleted {
                writer.write_u8(NIL);
                if let Some(identity) = entry.identity {
                    write_uint(writer, identity);
                }
                retired.push(entry.key);
                continue;
            }
            let Some(value) = entry.value else { continue };

            if pass.full {
                write_string(writer, &entry.key);
            } else {
                match entry.identity {
                    Some(identity) => write_uint(writer, identity),
                    None => {
                        write_string(writer, &entry.key);
                        if let Some((old_key, old_identity)) = entry.move_from {
                            writer.write_u8(MOVE);
                            write_uint(writer, old_identity);
                            retired.push(old_key);
                        }
                        introduced.push(entry.key.clone());
                    }
                }
            }
            self.encode_element(writer, element, &value, field, pass, commit)?;
        }

        if pass.commits() {
            commit.maps.push(MapCommit {
                map: map.clone(),
                introduced,
                retired,
            });
        }
        commit.trees.push(tree);
        Ok(())
    }

    fn encode_element(
        &self,
        writer: &mut ByteWriter,
        element: ElementKind,
        value: &Value,
        field: &str,
        pass: Pass,
        commit: &mut CommitLog,
    ) -> Result<(), EncodeError> {
        match element {
            ElementKind::Primitive(kind) => self.encode_primitive(writer, kind, value, field),
            ElementKind::Reference(declared) => {
                self.encode_reference(writer, declared, value, field, pass, commit)
            }
        }
    }
}

/// What a decode sub-pass reported back.
enum Progress {
    Complete,
    /// An unknown field order was hit; the rest of the patch was skipped.
    Aborted,
}

/// Callback invocations gathered during the structural pass and fired after
/// every borrow is released, so user callbacks may freely touch the graph.
enum Event {
    Added(ContainerObservers, Value, DirtyKey),
    Changed(ContainerObservers, Value, DirtyKey),
    Removed(ContainerObservers, Value, DirtyKey),
    Listen(Vec<ListenCallback>, Option<Value>, Option<Value>),
}

pub struct Decoder<'a> {
    registry: &'a TypeRegistry,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self { registry }
    }

    /// Apply a patch to `target` in place.
    pub fn decode(&self, target: &RecordRef, bytes: &[u8]) -> Result<(), DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let mut events = Vec::new();
        let result = self.decode_record(target, &mut reader, true, &mut events);
        // State already applied is observable even when the tail failed.
        fire_events(events);
        result.map(|_| ())
    }

    fn decode_record(
        &self,
        record: &RecordRef,
        reader: &mut ByteReader,
        root: bool,
        events: &mut Vec<Event>,
    ) -> Result<Progress, DecodeError> {
        let schema = record.borrow().schema().clone();

        loop {
            let Some(lead) = reader.peek() else {
                if root {
                    return Ok(Progress::Complete);
                }
                return Err(SerdeErr::UnexpectedEof.into());
            };
            if lead == END_OF_STRUCTURE && !root {
                reader.read_u8().map_err(DecodeError::from)?;
                return Ok(Progress::Complete);
            }
            if lead == NIL {
                reader.read_u8().map_err(DecodeError::from)?;
                let order = read_uint(reader)?;
                if order as usize >= schema.field_count() {
                    continue;
                }
                let order = order as u8;
                let previous = record.borrow().get_order(order).cloned();
                record.borrow_mut().apply_order(order, None);
                let listeners = record.borrow().listeners_for(order);
                if !listeners.is_empty() {
                    events.push(Event::Listen(listeners, None, previous));
                }
                continue;
            }

            let order = read_uint(reader)?;
            let descriptor = if (order as usize) < schema.field_count() {
                schema.field(order as u8).cloned()
            } else {
                None
            };
            let Some(descriptor) = descriptor else {
                warn!(
                    "unknown field order {} on type `{}`, skipping rest of patch",
                    order,
                    schema.name()
                );
                reader.skip_to_end();
                return Ok(Progress::Aborted);
            };
            let order = order as u8;
            let previous = record.borrow().get_order(order).cloned();

            let new_value = match descriptor.kind {
                FieldKind::Primitive(kind) => {
                    let value = self.read_primitive(kind, reader)?;
                    record.borrow_mut().apply_order(order, Some(value.clone()));
                    value
                }
                FieldKind::Reference(declared) => {
                    let concrete = self.read_type_id(reader, declared)?;
                    let child = match previous.as_ref().and_then(Value::as_record) {
                        Some(existing) if existing.borrow().schema().id() == concrete => {
                            existing.clone()
                        }
                        _ => {
                            let fresh = Record::new(self.registry.resolve(concrete)?);
                            record
                                .borrow_mut()
                                .apply_order(order, Some(Value::Record(fresh.clone())));
                            fresh
                        }
                    };
                    if let Progress::Aborted =
                        self.decode_record(&child, reader, false, events)?
                    {
                        return Ok(Progress::Aborted);
                    }
                    Value::Record(child)
                }
                FieldKind::ListOf(element) => {
                    let list = match previous.as_ref().and_then(Value::as_list) {
                        Some(existing) => existing.clone(),
                        None => {
                            let fresh = ListValue::new();
                            record
                                .borrow_mut()
                                .apply_order(order, Some(Value::List(fresh.clone())));
                            fresh
                        }
                    };
                    if let Progress::Aborted = self.decode_list(&list, element, reader, events)? {
                        return Ok(Progress::Aborted);
                    }
                    Value::List(list)
                }
                FieldKind::MapOf(element) => {
                    let map = match previous.as_ref().and_then(Value::as_map) {
                        Some(existing) => existing.clone(),
                        None => {
                            let fresh = MapValue::new();
                            record
                                .borrow_mut()
                                .apply_order(order, Some(Value::Map(fresh.clone())));
                            fresh
                        }
                    };
                    if let Progress::Aborted = self.decode_map(&map, element, reader, events)? {
                        return Ok(Progress::Aborted);
                    }
                    Value::Map(map)
                }
            };

            let listeners = record.borrow().listeners_for(order);
            if !listeners.is_empty() {
                events.push(Event::Listen(listeners, Some(new_value), previous));
            }
        }
    }

    fn decode_list(
        &self,
        list: &ListRef,
        element: ElementKind,
        reader: &mut ByteReader,
        events: &mut Vec<Event>,
    ) -> Result<Progress, DecodeError> {
        let total = read_uint(reader)? as usize;
        let count = read_uint(reader)? as usize;
        let observers = list.borrow().observers();

        // Move records address pre-patch positions, so the lookup table is
        // taken before the tail is cut off.
        let snapshot = list.borrow().snapshot();
        let removed = list.borrow_mut().apply_truncate(total);

        let mut applied = Vec::new();
        let mut reused = Vec::new();
        let progress = self.decode_list_entries(
            list,
            element,
            count,
            &snapshot,
            reader,
            &mut applied,
            &mut reused,
        );

        // A truncated slot whose occupant reappears through a move record
        // only changed position; everything else actually left the list.
        for (value, index) in removed {
            if reused.contains(&(index as usize)) {
                continue;
            }
            events.push(Event::Removed(
                observers.clone(),
                value,
                DirtyKey::Index(index),
            ));
        }
        events.append(&mut applied);
        progress
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_list_entries(
        &self,
        list: &ListRef,
        element: ElementKind,
        count: usize,
        snapshot: &[Value],
        reader: &mut ByteReader,
        events: &mut Vec<Event>,
        reused: &mut Vec<usize>,
    ) -> Result<Progress, DecodeError> {
        let observers = list.borrow().observers();

        for _ in 0..count {
            let index = read_uint(reader)? as usize;
            let moved_from = if reader.peek() == Some(MOVE) {
                reader.read_u8().map_err(DecodeError::from)?;
                Some(read_uint(reader)? as usize)
            } else {
                None
            };

            match element {
                ElementKind::Primitive(kind) => {
                    let value = self.read_primitive(kind, reader)?;
                    let existed = index < list.borrow().len();
                    list.borrow_mut().apply_set(index, value.clone());
                    events.push(if existed {
                        Event::Changed(observers.clone(), value, DirtyKey::Index(index as u64))
                    } else {
                        Event::Added(observers.clone(), value, DirtyKey::Index(index as u64))
                    });
                }
                ElementKind::Reference(declared) => {
                    let concrete = self.read_type_id(reader, declared)?;
                    let current = list.borrow().get(index).cloned();
                    let (child, existed) = if let Some(previous_index) = moved_from {
                        match snapshot.get(previous_index).and_then(Value::as_record) {
                            Some(moved) if moved.borrow().schema().id() == concrete => {
                                reused.push(previous_index);
                                (moved.clone(), true)
                            }
                            _ => (Record::new(self.registry.resolve(concrete)?), false),
                        }
                    } else {
                        match current.as_ref().and_then(Value::as_record) {
                            Some(existing) if existing.borrow().schema().id() == concrete => {
                                (existing.clone(), true)
                            }
                            _ => (Record::new(self.registry.resolve(concrete)?), false),
                        }
                    };
                    list.borrow_mut()
                        .apply_set(index, Value::Record(child.clone()));
                    if let Progress::Aborted =
                        self.decode_record(&child, reader, false, events)?
                    {
                        return Ok(Progress::Aborted);
                    }
                    let value = Value::Record(child);
                    events.push(if existed {
                        Event::Changed(observers.clone(), value, DirtyKey::Index(index as u64))
                    } else {
                        Event::Added(observers.clone(), value, DirtyKey::Index(index as u64))
                    });
                }
            }
        }
        Ok(Progress::Complete)
    }

    fn decode_map(
        &self,
        map: &MapRef,
        element: ElementKind,
        reader: &mut ByteReader,
        events: &mut Vec<Event>,
    ) -> Result<Progress, DecodeError> {
        let count = read_uint(reader)?;
        let observers = map.borrow().observers();

        for _ in 0..count {
            let lead = reader.peek().ok_or(SerdeErr::UnexpectedEof)?;

            if lead == NIL {
                reader.read_u8().map_err(DecodeError::from)?;
                let identity = read_uint(reader)?;
                let key = map
                    .borrow()
                    .key_of_identity(identity)
                    .cloned()
                    .ok_or(DecodeError::UnknownMapIdentity { identity })?;
                if let Some(value) = map.borrow_mut().apply_remove(&key) {
                    events.push(Event::Removed(
                        observers.clone(),
                        value,
                        DirtyKey::Key(key),
                    ));
                }
                continue;
            }

            if is_string_lead(lead) {
                let key = read_string(reader)?;
                let moved_from = if reader.peek() == Some(MOVE) {
                    reader.read_u8().map_err(DecodeError::from)?;
                    Some(read_uint(reader)?)
                } else {
                    None
                };

                if let Some(previous_identity) = moved_from {
                    let from_key = map
                        .borrow()
                        .key_of_identity(previous_identity)
                        .cloned()
                        .ok_or(DecodeError::UnknownMapIdentity {
                            identity: previous_identity,
                        })?;
                    map.borrow_mut().apply_move(&from_key, &key);
                    if map.borrow().identity_of_key(&key).is_none() {
                        map.borrow_mut().assign_identity_for(&key);
                    }
                    let (value, progress) =
                        self.decode_map_payload(map, &key, element, reader, events)?;
                    if let Progress::Aborted = progress {
                        return Ok(Progress::Aborted);
                    }
                    events.push(Event::Changed(observers.clone(), value, DirtyKey::Key(key)));
                    continue;
                }

                let existed = map.borrow().contains_key(&key);
                if map.borrow().identity_of_key(&key).is_none() {
                    map.borrow_mut().assign_identity_for(&key);
                }
                let (value, progress) =
                    self.decode_map_payload(map, &key, element, reader, events)?;
                if let Progress::Aborted = progress {
                    return Ok(Progress::Aborted);
                }
                events.push(if existed {
                    Event::Changed(observers.clone(), value, DirtyKey::Key(key))
                } else {
                    Event::Added(observers.clone(), value, DirtyKey::Key(key))
                });
                continue;
            }

            // Identity-referenced change to a known key.
            let identity = read_uint(reader)?;
            let key = map
                .borrow()
                .key_of_identity(identity)
                .cloned()
                .ok_or(DecodeError::UnknownMapIdentity { identity })?;
            let (value, progress) = self.decode_map_payload(map, &key, element, reader, events)?;
            if let Progress::Aborted = progress {
                return Ok(Progress::Aborted);
            }
            events.push(Event::Changed(observers.clone(), value, DirtyKey::Key(key)));
        }
        Ok(Progress::Complete)
    }

    fn decode_map_payload(
        &self,
        map: &MapRef,
        key: &str,
        element: ElementKind,
        reader: &mut ByteReader,
        events: &mut Vec<Event>,
    ) -> Result<(Value, Progress), DecodeError> {
        match element {
            ElementKind::Primitive(kind) => {
                let value = self.read_primitive(kind, reader)?;
                map.borrow_mut().apply_set(key, value.clone());
                Ok((value, Progress::Complete))
            }
            ElementKind::Reference(declared) => {
                let concrete = self.read_type_id(reader, declared)?;
                let current = {
                    let map = map.borrow();
                    map.get(key).and_then(Value::as_record).cloned()
                };
                let child = match current {
                    Some(existing) if existing.borrow().schema().id() == concrete => existing,
                    _ => {
                        let fresh = Record::new(self.registry.resolve(concrete)?);
                        map.borrow_mut().apply_set(key, Value::Record(fresh.clone()));
                        fresh
                    }
                };
                let progress = self.decode_record(&child, reader, false, events)?;
                Ok((Value::Record(child), progress))
            }
        }
    }

    fn read_primitive(
        &self,
        kind: PrimitiveKind,
        reader: &mut ByteReader,
    ) -> Result<Value, DecodeError> {
        Ok(match kind {
            PrimitiveKind::Str => Value::String(read_string(reader)?),
            PrimitiveKind::Boolean => Value::Boolean(read_bool(reader)?),
            PrimitiveKind::Number => Value::Number(read_number(reader)?),
            sized => {
                let width = sized
                    .fixed_width()
                    .ok_or(SerdeErr::InvalidLeadByte { lead: 0 })?;
                Value::Number(read_fixed(reader, width)?)
            }
        })
    }

    fn read_type_id(
        &self,
        reader: &mut ByteReader,
        declared: TypeId,
    ) -> Result<TypeId, DecodeError> {
        if reader.peek() == Some(TYPE_ID) {
            reader.read_u8().map_err(DecodeError::from)?;
            Ok(reader.read_u8().map_err(DecodeError::from)?)
        } else {
            Ok(declared)
        }
    }
}

fn fire_events(events: Vec<Event>) {
    for event in events {
        match event {
            Event::Added(observers, value, key) => observers.notify_add(&value, &key),
            Event::Changed(observers, value, key) => observers.notify_change(&value, &key),
            Event::Removed(observers, value, key) => observers.notify_remove(&value, &key),
            Event::Listen(callbacks, new, previous) => {
                for callback in callbacks {
                    run_callback(callback(new.as_ref(), previous.as_ref()));
                }
            }
        }
    }
}

fn sanitize_number(value: f64, field: &str) -> f64 {
    use mirror_serde::MAX_SAFE_INTEGER;
    if value.is_nan() {
        warn!("NaN assigned to `{}`, encoding 0", field);
        0.0
    } else if value == f64::INFINITY {
        MAX_SAFE_INTEGER
    } else if value == f64::NEG_INFINITY {
        -MAX_SAFE_INTEGER
    } else {
        value
    }
}

/// Drop all pending changes in the graph under `root` without encoding,
/// as if an incremental pass had been encoded and thrown away.
pub fn discard_all_changes(root: &RecordRef) {
    discard_value(&Value::Record(root.clone()));
}

fn discard_value(value: &Value) {
    if let Some(tree) = value.change_tree() {
        tree.borrow_mut().discard();
    }
    for child in value.child_values() {
        discard_value(&child);
    }
}
