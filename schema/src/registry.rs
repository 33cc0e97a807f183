//! Type registration and polymorphic resolution.
//!
//! A [`TypeRegistry`] maps each structured record type to a small integer id
//! that both sides agree on. Ids are assigned sequentially at registration,
//! so the two sides must register their types in the same order (or one side
//! must bootstrap from the other via reflection).

use std::collections::HashMap;
use std::rc::Rc;

use log::info;
use mirror_serde::FixedWidth;

use crate::error::RegistryError;
use crate::record::RecordRef;
use crate::types::{FieldOrder, RecipientId, TypeId, PRIMITIVE_ELEMENT};
use crate::value::Value;

/// Field orders must fit the low half of one wire byte.
const MAX_FIELDS: usize = 128;

/// Per-recipient visibility predicate for one field.
pub type FilterFn = Rc<dyn Fn(RecipientId, &Value, &RecordRef) -> bool>;

/// Kind of a primitive field or container element.
///
/// `Number` is the compact variable-width encoding; the sized kinds always
/// occupy their declared width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Number,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Str,
    Boolean,
}

impl PrimitiveKind {
    /// Wire tag used by the reflection protocol.
    pub fn tag(self) -> &'static str {
        match self {
            PrimitiveKind::Number => "number",
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::Uint8 => "uint8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::Uint16 => "uint16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Uint32 => "uint32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::Uint64 => "uint64",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
            PrimitiveKind::Str => "string",
            PrimitiveKind::Boolean => "boolean",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "number" => PrimitiveKind::Number,
            "int8" => PrimitiveKind::Int8,
            "uint8" => PrimitiveKind::Uint8,
            "int16" => PrimitiveKind::Int16,
            "uint16" => PrimitiveKind::Uint16,
            "int32" => PrimitiveKind::Int32,
            "uint32" => PrimitiveKind::Uint32,
            "int64" => PrimitiveKind::Int64,
            "uint64" => PrimitiveKind::Uint64,
            "float32" => PrimitiveKind::Float32,
            "float64" => PrimitiveKind::Float64,
            "string" => PrimitiveKind::Str,
            "boolean" => PrimitiveKind::Boolean,
            _ => return None,
        })
    }

    /// Fixed wire width, or `None` for the self-describing kinds.
    pub fn fixed_width(self) -> Option<FixedWidth> {
        Some(match self {
            PrimitiveKind::Int8 => FixedWidth::Int8,
            PrimitiveKind::Uint8 => FixedWidth::Uint8,
            PrimitiveKind::Int16 => FixedWidth::Int16,
            PrimitiveKind::Uint16 => FixedWidth::Uint16,
            PrimitiveKind::Int32 => FixedWidth::Int32,
            PrimitiveKind::Uint32 => FixedWidth::Uint32,
            PrimitiveKind::Int64 => FixedWidth::Int64,
            PrimitiveKind::Uint64 => FixedWidth::Uint64,
            PrimitiveKind::Float32 => FixedWidth::Float32,
            PrimitiveKind::Float64 => FixedWidth::Float64,
            PrimitiveKind::Number | PrimitiveKind::Str | PrimitiveKind::Boolean => return None,
        })
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, PrimitiveKind::Str | PrimitiveKind::Boolean)
    }
}

/// Kind of a container element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Primitive(PrimitiveKind),
    Reference(TypeId),
}

impl ElementKind {
    /// Registry id transported by reflection; primitives use the sentinel.
    pub fn referenced_type(self) -> TypeId {
        match self {
            ElementKind::Primitive(_) => PRIMITIVE_ELEMENT,
            ElementKind::Reference(type_id) => type_id,
        }
    }
}

/// Declared kind of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    Reference(TypeId),
    ListOf(ElementKind),
    MapOf(ElementKind),
}

/// What a deprecated field does when touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeprecationPolicy {
    /// Reads and writes return [`RecordError::DeprecatedField`].
    ///
    /// [`RecordError::DeprecatedField`]: crate::error::RecordError::DeprecatedField
    Throws,
    /// Reads yield nothing, writes are dropped silently.
    Ignore,
}

#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub order: FieldOrder,
    pub kind: FieldKind,
    pub filter: Option<FilterFn>,
    pub deprecated: Option<DeprecationPolicy>,
}

/// One registered record type: its id, name, optional parent, and the full
/// field table (inherited fields first, at their original orders).
pub struct SchemaType {
    id: TypeId,
    name: String,
    parent: Option<TypeId>,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, FieldOrder>,
    inherited: usize,
}

impl SchemaType {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<TypeId> {
        self.parent
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Fields declared on this type itself, excluding inherited ones.
    pub fn own_fields(&self) -> &[FieldDescriptor] {
        &self.fields[self.inherited..]
    }

    pub fn field(&self, order: FieldOrder) -> Option<&FieldDescriptor> {
        self.fields.get(order as usize)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).and_then(|order| self.field(*order))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_filters(&self) -> bool {
        self.fields.iter().any(|field| field.filter.is_some())
    }
}

/// Collects a type's declaration before it is handed to
/// [`TypeRegistry::register`]. Field orders follow call sequence.
pub struct SchemaTypeBuilder {
    name: String,
    parent: Option<TypeId>,
    fields: Vec<(String, FieldKind, Option<FilterFn>, Option<DeprecationPolicy>)>,
}

impl SchemaTypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            fields: Vec::new(),
        }
    }

    /// Inherit the full field table of an already-registered type.
    pub fn extend(mut self, parent: TypeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push((name.to_string(), kind, None, None));
        self
    }

    /// A field whose visibility is decided per recipient during filtered
    /// encode passes.
    pub fn filtered_field(mut self, name: &str, kind: FieldKind, filter: FilterFn) -> Self {
        self.fields.push((name.to_string(), kind, Some(filter), None));
        self
    }

    /// A retired field. It keeps its wire order so older peers still line up,
    /// but direct access follows `policy`.
    pub fn deprecated_field(mut self, name: &str, kind: FieldKind, policy: DeprecationPolicy) -> Self {
        self.fields.push((name.to_string(), kind, None, Some(policy)));
        self
    }
}

/// The type table shared by every encoder and decoder of one state graph.
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<Rc<SchemaType>>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, builder: SchemaTypeBuilder) -> Result<TypeId, RegistryError> {
        if self.by_name.contains_key(&builder.name) {
            return Err(RegistryError::DuplicateTypeName { name: builder.name });
        }
        if self.types.len() >= PRIMITIVE_ELEMENT as usize {
            return Err(RegistryError::TooManyTypes { name: builder.name });
        }

        let mut fields: Vec<FieldDescriptor> = Vec::new();
        let mut inherited = 0;
        if let Some(parent) = builder.parent {
            let parent_type = self
                .types
                .get(parent as usize)
                .ok_or(RegistryError::UnknownParent { parent })?;
            fields.extend(parent_type.fields.iter().cloned());
            inherited = fields.len();
        }

        if fields.len() + builder.fields.len() > MAX_FIELDS {
            return Err(RegistryError::TooManyFields { name: builder.name });
        }

        let mut by_name = HashMap::new();
        for field in &fields {
            by_name.insert(field.name.clone(), field.order);
        }
        for (name, kind, filter, deprecated) in builder.fields {
            let order = fields.len() as FieldOrder;
            if by_name.insert(name.clone(), order).is_some() {
                return Err(RegistryError::DuplicateFieldName {
                    name: builder.name,
                    field: name,
                });
            }
            fields.push(FieldDescriptor {
                name,
                order,
                kind,
                filter,
                deprecated,
            });
        }

        let id = self.types.len() as TypeId;
        info!("registered type `{}` with id {}", builder.name, id);

        self.by_name.insert(builder.name.clone(), id);
        self.types.push(Rc::new(SchemaType {
            id,
            name: builder.name,
            parent: builder.parent,
            fields,
            by_name,
            inherited,
        }));
        Ok(id)
    }

    pub fn resolve(&self, type_id: TypeId) -> Result<&Rc<SchemaType>, RegistryError> {
        self.types
            .get(type_id as usize)
            .ok_or(RegistryError::UnknownTypeId { type_id })
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<&Rc<SchemaType>> {
        self.by_name.get(name).and_then(|id| self.types.get(*id as usize))
    }

    /// True when `child` is `base` or transitively extends it.
    pub fn is_subtype_of(&self, child: TypeId, base: TypeId) -> bool {
        let mut current = Some(child);
        while let Some(type_id) = current {
            if type_id == base {
                return true;
            }
            current = self
                .types
                .get(type_id as usize)
                .and_then(|schema_type| schema_type.parent);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = &Rc<SchemaType>> {
        self.types.iter()
    }
}
