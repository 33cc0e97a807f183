//! Schema export and import over the wire.
//!
//! Reflection serializes a registry's field layout as ordinary state, using
//! a small private bootstrap registry. A receiver with no compiled types
//! rebuilds an equivalent registry (same ids, same orders) and gets a root
//! instance ready for ordinary patches.

use crate::codec::{Decoder, Encoder};
use crate::containers::{ListValue, MapValue};
use crate::error::{DecodeError, EncodeError};
use crate::record::{Record, RecordRef};
use crate::registry::{
    ElementKind, FieldKind, PrimitiveKind, SchemaTypeBuilder, TypeRegistry,
};
use crate::types::{TypeId, PRIMITIVE_ELEMENT};
use crate::value::Value;

const FIELD_TYPE: &str = "ReflectionField";
const TYPE_TYPE: &str = "ReflectionType";
const ROOT_TYPE: &str = "Reflection";

fn bootstrap_registry() -> Result<TypeRegistry, EncodeError> {
    let mut registry = TypeRegistry::new();
    let field = registry.register(
        SchemaTypeBuilder::new(FIELD_TYPE)
            .field("name", FieldKind::Primitive(PrimitiveKind::Str))
            .field("type", FieldKind::Primitive(PrimitiveKind::Str))
            .field("referenced_type", FieldKind::Primitive(PrimitiveKind::Uint8)),
    )?;
    let type_id = registry.register(
        SchemaTypeBuilder::new(TYPE_TYPE)
            .field("id", FieldKind::Primitive(PrimitiveKind::Uint8))
            .field("fields", FieldKind::ListOf(ElementKind::Reference(field))),
    )?;
    registry.register(
        SchemaTypeBuilder::new(ROOT_TYPE)
            .field("types", FieldKind::ListOf(ElementKind::Reference(type_id)))
            .field("root_type", FieldKind::Primitive(PrimitiveKind::Uint8)),
    )?;
    Ok(registry)
}

/// Wire tag and referenced-type byte for one field kind.
fn field_tag(kind: FieldKind) -> (String, TypeId) {
    match kind {
        FieldKind::Primitive(kind) => (kind.tag().to_string(), PRIMITIVE_ELEMENT),
        FieldKind::Reference(type_id) => ("ref".to_string(), type_id),
        FieldKind::ListOf(ElementKind::Primitive(kind)) => {
            (format!("list:{}", kind.tag()), PRIMITIVE_ELEMENT)
        }
        FieldKind::ListOf(ElementKind::Reference(type_id)) => ("list".to_string(), type_id),
        FieldKind::MapOf(ElementKind::Primitive(kind)) => {
            (format!("map:{}", kind.tag()), PRIMITIVE_ELEMENT)
        }
        FieldKind::MapOf(ElementKind::Reference(type_id)) => ("map".to_string(), type_id),
    }
}

fn parse_tag(tag: &str, referenced: TypeId) -> Option<FieldKind> {
    Some(match tag {
        "ref" => FieldKind::Reference(referenced),
        "list" => FieldKind::ListOf(ElementKind::Reference(referenced)),
        "map" => FieldKind::MapOf(ElementKind::Reference(referenced)),
        _ => {
            if let Some(element) = tag.strip_prefix("list:") {
                FieldKind::ListOf(ElementKind::Primitive(PrimitiveKind::from_tag(element)?))
            } else if let Some(element) = tag.strip_prefix("map:") {
                FieldKind::MapOf(ElementKind::Primitive(PrimitiveKind::from_tag(element)?))
            } else {
                FieldKind::Primitive(PrimitiveKind::from_tag(tag)?)
            }
        }
    })
}

/// Serialize `registry`'s layout, rooted at `root_type`.
pub fn encode(registry: &TypeRegistry, root_type: TypeId) -> Result<Vec<u8>, EncodeError> {
    let bootstrap = bootstrap_registry()?;
    let field_schema = bootstrap.resolve(0)?.clone();
    let type_schema = bootstrap.resolve(1)?.clone();
    let root_schema = bootstrap.resolve(2)?.clone();

    let types = ListValue::new();
    for schema_type in registry.types() {
        let fields = ListValue::new();
        for descriptor in schema_type.fields() {
            let (tag, referenced) = field_tag(descriptor.kind);
            let field = Record::new(&field_schema);
            {
                let mut field = field.borrow_mut();
                field.set_order(0, Some(Value::String(descriptor.name.clone())));
                field.set_order(1, Some(Value::String(tag)));
                field.set_order(2, Some(Value::Number(referenced as f64)));
            }
            fields.borrow_mut().push(Value::Record(field));
        }

        let reflected = Record::new(&type_schema);
        {
            let mut reflected = reflected.borrow_mut();
            reflected.set_order(0, Some(Value::Number(schema_type.id() as f64)));
            reflected.set_order(1, Some(Value::List(fields)));
        }
        types.borrow_mut().push(Value::Record(reflected));
    }

    let root = Record::new(&root_schema);
    {
        let mut root = root.borrow_mut();
        root.set_order(0, Some(Value::List(types)));
        root.set_order(1, Some(Value::Number(root_type as f64)));
    }

    Encoder::new(&bootstrap).encode_full(&root)
}

/// Rebuild a registry and a decode-ready root instance from a reflection
/// payload. Reference, list, and map fields on the root are eagerly
/// initialized so the first incremental patch lands on live instances.
pub fn decode(bytes: &[u8]) -> Result<(TypeRegistry, RecordRef), DecodeError> {
    let bootstrap = bootstrap_registry().map_err(registry_error)?;
    let root_schema = bootstrap
        .resolve_by_name(ROOT_TYPE)
        .ok_or(DecodeError::MalformedReflection {
            detail: "bootstrap registry missing root type",
        })?
        .clone();
    let reflection = Record::new(&root_schema);
    Decoder::new(&bootstrap).decode(&reflection, bytes)?;

    let reflection = reflection.borrow();
    let types = reflection
        .get_order(0)
        .and_then(Value::as_list)
        .ok_or(DecodeError::MalformedReflection {
            detail: "missing type table",
        })?
        .clone();
    let root_type = reflection
        .get_order(1)
        .and_then(Value::as_number)
        .ok_or(DecodeError::MalformedReflection {
            detail: "missing root type id",
        })? as TypeId;

    // Collect (id, fields) and register in ascending id order so the
    // rebuilt registry hands out the same ids.
    let mut declarations: Vec<(TypeId, Vec<(String, FieldKind)>)> = Vec::new();
    for entry in types.borrow().iter() {
        let reflected = entry
            .as_record()
            .ok_or(DecodeError::MalformedReflection {
                detail: "type table entry is not a record",
            })?
            .borrow();
        let id = reflected
            .get_order(0)
            .and_then(Value::as_number)
            .ok_or(DecodeError::MalformedReflection {
                detail: "type entry missing id",
            })? as TypeId;
        let fields = reflected
            .get_order(1)
            .and_then(Value::as_list)
            .ok_or(DecodeError::MalformedReflection {
                detail: "type entry missing field list",
            })?
            .clone();

        let mut declared = Vec::new();
        for field in fields.borrow().iter() {
            let field = field
                .as_record()
                .ok_or(DecodeError::MalformedReflection {
                    detail: "field entry is not a record",
                })?
                .borrow();
            let name = field
                .get_order(0)
                .and_then(Value::as_str)
                .ok_or(DecodeError::MalformedReflection {
                    detail: "field entry missing name",
                })?
                .to_string();
            let tag = field
                .get_order(1)
                .and_then(Value::as_str)
                .ok_or(DecodeError::MalformedReflection {
                    detail: "field entry missing type tag",
                })?;
            let referenced = field
                .get_order(2)
                .and_then(Value::as_number)
                .ok_or(DecodeError::MalformedReflection {
                    detail: "field entry missing referenced type",
                })? as TypeId;
            let kind = parse_tag(tag, referenced).ok_or(DecodeError::MalformedReflection {
                detail: "unrecognized field type tag",
            })?;
            declared.push((name, kind));
        }
        declarations.push((id, declared));
    }
    declarations.sort_by_key(|(id, _)| *id);

    let mut registry = TypeRegistry::new();
    for (id, declared) in declarations {
        let mut builder = SchemaTypeBuilder::new(&format!("reflected_{}", id));
        for (name, kind) in declared {
            builder = builder.field(&name, kind);
        }
        registry.register(builder)?;
    }

    let root_schema = registry.resolve(root_type)?.clone();
    let root = Record::new(&root_schema);
    {
        let mut instance = root.borrow_mut();
        for descriptor in root_schema.fields() {
            let initial = match descriptor.kind {
                FieldKind::Reference(type_id) => {
                    Some(Value::Record(Record::new(registry.resolve(type_id)?)))
                }
                FieldKind::ListOf(_) => Some(Value::List(ListValue::new())),
                FieldKind::MapOf(_) => Some(Value::Map(MapValue::new())),
                FieldKind::Primitive(_) => None,
            };
            if let Some(initial) = initial {
                instance.apply_order(descriptor.order, Some(initial));
            }
        }
    }
    Ok((registry, root))
}

fn registry_error(error: EncodeError) -> DecodeError {
    match error {
        EncodeError::Registry(inner) => DecodeError::Registry(inner),
        _ => DecodeError::MalformedReflection {
            detail: "bootstrap registry construction failed",
        },
    }
}
