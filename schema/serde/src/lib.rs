//! # Mirror Serde
//! Byte-level value grammar shared between mirror-schema encoders & decoders.
//!
//! The grammar is self-describing for generic numbers and strings, raw
//! little-endian for explicitly sized primitive kinds, and reserves four
//! control codes ([`NIL`], [`END_OF_STRUCTURE`], [`MOVE`], [`TYPE_ID`]) that
//! no value encoding can legally start with.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod error;
mod number;
mod reader;
mod writer;

pub use error::SerdeErr;
pub use number::{
    is_number_lead, is_string_lead, read_bool, read_fixed, read_number, read_string, read_uint,
    write_bool, write_fixed, write_number, write_string, write_uint, FixedWidth,
    END_OF_STRUCTURE, MAX_SAFE_INTEGER, MOVE, NIL, TYPE_ID,
};
pub use reader::ByteReader;
pub use writer::ByteWriter;
