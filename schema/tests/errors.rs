use mirror_schema::{
    DecodeError, Decoder, DeprecationPolicy, ElementKind, EncodeError, Encoder, FieldKind,
    PrimitiveKind, Record, RecordError, SchemaTypeBuilder, TypeRegistry, Value,
};

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let item = registry
        .register(
            SchemaTypeBuilder::new("Item")
                .field("weight", FieldKind::Primitive(PrimitiveKind::Number)),
        )
        .unwrap();
    registry
        .register(
            SchemaTypeBuilder::new("Intruder")
                .field("payload", FieldKind::Primitive(PrimitiveKind::Str)),
        )
        .unwrap();
    registry
        .register(
            SchemaTypeBuilder::new("Bag")
                .field("capacity", FieldKind::Primitive(PrimitiveKind::Number))
                .field("held", FieldKind::Reference(item))
                .field(
                    "slots",
                    FieldKind::ListOf(ElementKind::Primitive(PrimitiveKind::Number)),
                )
                .field(
                    "tags",
                    FieldKind::MapOf(ElementKind::Primitive(PrimitiveKind::Number)),
                )
                .deprecated_field(
                    "weight_limit",
                    FieldKind::Primitive(PrimitiveKind::Number),
                    DeprecationPolicy::Throws,
                ),
        )
        .unwrap();
    registry
}

fn new_bag(registry: &TypeRegistry) -> mirror_schema::RecordRef {
    Record::new(registry.resolve(2).unwrap())
}

#[test]
fn wrong_primitive_kind_is_an_encode_error() {
    let registry = registry();
    let bag = new_bag(&registry);
    bag.borrow_mut()
        .set("capacity", Some(Value::String("heavy".into())))
        .unwrap();

    let result = Encoder::new(&registry).encode_incremental(&bag);
    assert!(matches!(
        result,
        Err(EncodeError::ValueType { expected: "number", found: "string", .. })
    ));
}

#[test]
fn unrelated_record_in_a_reference_field_is_rejected() {
    let registry = registry();
    let bag = new_bag(&registry);
    let intruder = Record::new(registry.resolve(1).unwrap());
    bag.borrow_mut()
        .set("held", Some(Value::Record(intruder)))
        .unwrap();

    let result = Encoder::new(&registry).encode_incremental(&bag);
    match result {
        Err(EncodeError::TypeMismatch { expected, found, field }) => {
            assert_eq!(expected, "Item");
            assert_eq!(found, "Intruder");
            assert_eq!(field, "held");
        }
        other => panic!("expected a type mismatch, got {:?}", other),
    }
}

#[test]
fn non_container_in_a_container_field_is_rejected() {
    let registry = registry();
    let bag = new_bag(&registry);
    bag.borrow_mut()
        .set("slots", Some(Value::Number(3.0)))
        .unwrap();

    let result = Encoder::new(&registry).encode_incremental(&bag);
    assert!(matches!(
        result,
        Err(EncodeError::TypeMismatch { ref expected, .. }) if expected == "list"
    ));
}

#[test]
fn deprecated_fields_reject_reads_and_writes() {
    let registry = registry();
    let bag = new_bag(&registry);
    let mut bag = bag.borrow_mut();

    assert!(matches!(
        bag.set("weight_limit", Some(Value::Number(1.0))),
        Err(RecordError::DeprecatedField { .. })
    ));
    assert!(matches!(
        bag.get("weight_limit"),
        Err(RecordError::DeprecatedField { .. })
    ));
    assert!(matches!(
        bag.get("no_such_field"),
        Err(RecordError::UnknownField { .. })
    ));
}

#[test]
fn a_failed_encode_keeps_the_pending_changes() {
    let registry = registry();
    let bag = new_bag(&registry);
    {
        let mut bag = bag.borrow_mut();
        bag.set("capacity", Some(Value::Number(10.0))).unwrap();
        bag.set("held", Some(Value::Number(1.0))).unwrap();
    }
    let encoder = Encoder::new(&registry);
    assert!(encoder.encode_incremental(&bag).is_err());

    // Repair the offending field; everything dirty is still dirty.
    let item = Record::new(registry.resolve(0).unwrap());
    item.borrow_mut().set("weight", Some(Value::Number(2.0))).unwrap();
    bag.borrow_mut().set("held", Some(Value::Record(item))).unwrap();

    let patch = encoder.encode_incremental(&bag).unwrap();
    let mirror = new_bag(&registry);
    Decoder::new(&registry).decode(&mirror, &patch).unwrap();
    let mirror = mirror.borrow();
    assert_eq!(mirror.get("capacity").unwrap().unwrap().as_number(), Some(10.0));
    let held = mirror.get("held").unwrap().unwrap().as_record().unwrap().clone();
    assert_eq!(held.borrow().get("weight").unwrap().unwrap().as_number(), Some(2.0));
}

#[test]
fn truncated_patches_surface_as_decode_errors() {
    let registry = registry();
    let bag = new_bag(&registry);
    bag.borrow_mut()
        .set("capacity", Some(Value::Number(300.0)))
        .unwrap();
    let mut patch = Encoder::new(&registry).encode_incremental(&bag).unwrap();
    patch.truncate(patch.len() - 1);

    let mirror = new_bag(&registry);
    let result = Decoder::new(&registry).decode(&mirror, &patch);
    assert!(matches!(result, Err(DecodeError::Serde(_))));
}

#[test]
fn unknown_map_identities_are_rejected() {
    let registry = registry();
    let mirror = new_bag(&registry);

    // Field 3 is the map; one entry addressed by an identity this mirror
    // has never been introduced to.
    let patch = vec![0x03, 0x01, 0x05];
    let result = Decoder::new(&registry).decode(&mirror, &patch);
    assert!(matches!(
        result,
        Err(DecodeError::UnknownMapIdentity { identity: 5 })
    ));
}

#[test]
fn discarding_all_changes_yields_an_empty_patch() {
    let registry = registry();
    let bag = new_bag(&registry);
    {
        let mut bag = bag.borrow_mut();
        bag.set("capacity", Some(Value::Number(5.0))).unwrap();
        let item = Record::new(registry.resolve(0).unwrap());
        item.borrow_mut().set("weight", Some(Value::Number(1.0))).unwrap();
        bag.set("held", Some(Value::Record(item))).unwrap();
    }

    mirror_schema::discard_all_changes(&bag);
    let patch = Encoder::new(&registry).encode_incremental(&bag).unwrap();
    assert!(patch.is_empty());
}
