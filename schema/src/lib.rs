//! # Mirror Schema
//! A schema-driven, delta-compressed state-synchronization codec.
//!
//! An authoritative process holds a mutable graph of [`Record`]s, lists, and
//! maps; every mutation is tracked per instance, and an [`Encoder`] streams
//! minimal binary patches to observers, which apply them with a [`Decoder`]
//! onto an equivalent mirror graph. Object identity survives across patches,
//! fields can be hidden per recipient, and a receiver without compiled type
//! definitions can bootstrap its schema through [`reflection`].

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod change_tree;
mod codec;
mod containers;
mod error;
mod observer;
mod record;
mod registry;
mod types;
mod value;

pub mod reflection;

pub use change_tree::{ChangeTree, ChangeTreeRef, DirtyKey};
pub use codec::{discard_all_changes, Decoder, Encoder};
pub use containers::{ListRef, ListValue, MapRef, MapValue};
pub use error::{DecodeError, EncodeError, RecordError, RegistryError};
pub use observer::{
    set_error_hook, CallbackResult, ContainerCallback, ContainerObservers, ErrorHook,
    ListenCallback,
};
pub use record::{Record, RecordRef};
pub use registry::{
    DeprecationPolicy, ElementKind, FieldDescriptor, FieldKind, FilterFn, PrimitiveKind,
    SchemaType, SchemaTypeBuilder, TypeRegistry,
};
pub use types::{ElementId, FieldOrder, RecipientId, TypeId, PRIMITIVE_ELEMENT};
pub use value::Value;

pub use mirror_serde::{SerdeErr, END_OF_STRUCTURE, MAX_SAFE_INTEGER, MOVE, NIL, TYPE_ID};
