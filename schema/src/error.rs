use thiserror::Error;

use mirror_serde::SerdeErr;

use crate::types::TypeId;

/// Errors that can occur while registering types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A type with this name already exists in the registry
    #[error("a type named `{name}` is already registered")]
    DuplicateTypeName { name: String },

    /// Type id lookup failed
    #[error("type id {type_id} not found in registry")]
    UnknownTypeId { type_id: TypeId },

    /// Parent id passed to `extend` does not exist
    #[error("cannot extend unknown parent type id {parent}")]
    UnknownParent { parent: TypeId },

    /// Registry id space is exhausted (0xFF is reserved)
    #[error("registry is full, cannot register `{name}`")]
    TooManyTypes { name: String },

    /// A single type's field orders must stay within one wire byte
    #[error("type `{name}` exceeds the 128-field limit")]
    TooManyFields { name: String },

    /// Two fields of one type share a name
    #[error("field `{field}` declared twice on type `{name}`")]
    DuplicateFieldName { name: String, field: String },
}

/// Errors that can occur on direct record access
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Field flagged deprecated with the throwing policy
    #[error("field `{field}` is deprecated")]
    DeprecatedField { field: String },

    /// Field name not declared on the record's type
    #[error("no field named `{field}` on type `{type_name}`")]
    UnknownField { type_name: String, field: String },
}

/// Errors that abort an encode pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A primitive field holds a value of the wrong kind
    #[error("a '{expected}' was expected, but '{found}' was provided in {field}")]
    ValueType {
        expected: &'static str,
        found: &'static str,
        field: String,
    },

    /// A reference/list/map field holds a value outside the declared
    /// type's subtype forest
    #[error("an instance of '{expected}' was expected, but '{found}' was provided in {field}")]
    TypeMismatch {
        expected: String,
        found: String,
        field: String,
    },

    /// Registry lookup failed mid-encode
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors that abort a decode pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The wire grammar could not be read
    #[error(transparent)]
    Serde(#[from] SerdeErr),

    /// A type-discriminator referenced an id this registry does not know
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A map entry referenced a numeric identity never introduced here
    #[error("map entry identity {identity} is not known to this mirror")]
    UnknownMapIdentity { identity: u64 },

    /// A reflection payload decoded but its content is not a usable schema
    #[error("malformed reflection data: {detail}")]
    MalformedReflection { detail: &'static str },
}
