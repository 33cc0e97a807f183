//! The self-describing value grammar.
//!
//! Four byte values are reserved as control codes and are never producible
//! as the leading byte of any value: the grammar's single-byte integers live
//! in `0x00..=0x7F` and `0xE0..=0xFF`, strings in `0xA0..=0xBF` plus the
//! `0xD9..=0xDB` length prefixes, and everything else carries a
//! width-selector prefix from `0xCA..=0xCF` / `0xD0..=0xD3`. A value on a
//! promotion boundary (e.g. 128) moves to the next wider form instead of
//! occupying a reserved byte.

use crate::{error::SerdeErr, reader::ByteReader, writer::ByteWriter};

/// Field value is absent / explicitly removed.
pub const NIL: u8 = 0xC0;
/// Terminates the field list of every non-root structure.
pub const END_OF_STRUCTURE: u8 = 0xC1;
/// The following value is the element's previous key/index, not a payload.
pub const MOVE: u8 = 0xD4;
/// The following byte is a registry id selecting a concrete subtype.
pub const TYPE_ID: u8 = 0xD5;

// Width selectors.
const FLOAT32: u8 = 0xCA;
const FLOAT64: u8 = 0xCB;
const UINT8: u8 = 0xCC;
const UINT16: u8 = 0xCD;
const UINT32: u8 = 0xCE;
const UINT64: u8 = 0xCF;
const INT8: u8 = 0xD0;
const INT16: u8 = 0xD1;
const INT32: u8 = 0xD2;
const INT64: u8 = 0xD3;

// String length prefixes.
const FIXSTR: u8 = 0xA0; // 0xA0..=0xBF, low 5 bits are the length
const STR8: u8 = 0xD9;
const STR16: u8 = 0xDA;
const STR32: u8 = 0xDB;

/// Largest integer magnitude the generic number grammar encodes as an
/// integer; beyond it (and for non-integral values) float64 is used.
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0; // 2^53 - 1

/// True if `lead` can begin a generic number encoding.
pub fn is_number_lead(lead: u8) -> bool {
    matches!(lead, 0x00..=0x7F | 0xE0..=0xFF | 0xCA..=0xCF | 0xD0..=0xD3)
}

/// True if `lead` can begin a string encoding.
pub fn is_string_lead(lead: u8) -> bool {
    matches!(lead, 0xA0..=0xBF | STR8 | STR16 | STR32)
}

/// Encode a generic number: smallest integer width that fits, float64 for
/// non-integral values or magnitudes beyond [`MAX_SAFE_INTEGER`].
pub fn write_number(writer: &mut ByteWriter, value: f64) {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE_INTEGER {
        if value >= 0.0 {
            write_uint(writer, value as u64);
        } else {
            let value = value as i64;
            if value >= -32 {
                writer.write_u8((value as i8) as u8);
            } else if value >= -(1 << 7) {
                writer.write_u8(INT8);
                writer.write_u8((value as i8) as u8);
            } else if value >= -(1 << 15) {
                writer.write_u8(INT16);
                writer.write_bytes(&(value as i16).to_le_bytes());
            } else if value >= -(1 << 31) {
                writer.write_u8(INT32);
                writer.write_bytes(&(value as i32).to_le_bytes());
            } else {
                writer.write_u8(INT64);
                writer.write_bytes(&value.to_le_bytes());
            }
        }
    } else {
        writer.write_u8(FLOAT64);
        writer.write_bytes(&value.to_le_bytes());
    }
}

/// Encode a non-negative integer with the same grammar as [`write_number`].
pub fn write_uint(writer: &mut ByteWriter, value: u64) {
    if value < 0x80 {
        writer.write_u8(value as u8);
    } else if value <= 0xFF {
        writer.write_u8(UINT8);
        writer.write_u8(value as u8);
    } else if value <= 0xFFFF {
        writer.write_u8(UINT16);
        writer.write_bytes(&(value as u16).to_le_bytes());
    } else if value <= 0xFFFF_FFFF {
        writer.write_u8(UINT32);
        writer.write_bytes(&(value as u32).to_le_bytes());
    } else {
        writer.write_u8(UINT64);
        writer.write_bytes(&value.to_le_bytes());
    }
}

pub fn read_number(reader: &mut ByteReader) -> Result<f64, SerdeErr> {
    let lead = reader.read_u8()?;
    match lead {
        0x00..=0x7F => Ok(lead as f64),
        0xE0..=0xFF => Ok((lead as i8) as f64),
        UINT8 => Ok(reader.read_u8()? as f64),
        UINT16 => Ok(u16::from_le_bytes(reader.read_bytes(2)?.try_into().unwrap()) as f64),
        UINT32 => Ok(u32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as f64),
        UINT64 => Ok(u64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap()) as f64),
        INT8 => Ok((reader.read_u8()? as i8) as f64),
        INT16 => Ok(i16::from_le_bytes(reader.read_bytes(2)?.try_into().unwrap()) as f64),
        INT32 => Ok(i32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as f64),
        INT64 => Ok(i64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap()) as f64),
        FLOAT32 => Ok(f32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as f64),
        FLOAT64 => Ok(f64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap())),
        _ => Err(SerdeErr::InvalidLeadByte { lead }),
    }
}

pub fn read_uint(reader: &mut ByteReader) -> Result<u64, SerdeErr> {
    let lead = reader.read_u8()?;
    match lead {
        0x00..=0x7F => Ok(lead as u64),
        UINT8 => Ok(reader.read_u8()? as u64),
        UINT16 => Ok(u16::from_le_bytes(reader.read_bytes(2)?.try_into().unwrap()) as u64),
        UINT32 => Ok(u32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as u64),
        UINT64 => Ok(u64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap())),
        _ => Err(SerdeErr::InvalidLeadByte { lead }),
    }
}

pub fn write_string(writer: &mut ByteWriter, value: &str) {
    let bytes = value.as_bytes();
    let length = bytes.len();
    if length < 0x20 {
        writer.write_u8(FIXSTR | length as u8);
    } else if length < 0x100 {
        writer.write_u8(STR8);
        writer.write_u8(length as u8);
    } else if length < 0x10000 {
        writer.write_u8(STR16);
        writer.write_bytes(&(length as u16).to_le_bytes());
    } else {
        writer.write_u8(STR32);
        writer.write_bytes(&(length as u32).to_le_bytes());
    }
    writer.write_bytes(bytes);
}

pub fn read_string(reader: &mut ByteReader) -> Result<String, SerdeErr> {
    let lead = reader.read_u8()?;
    let length = match lead {
        0xA0..=0xBF => (lead & 0x1F) as usize,
        STR8 => reader.read_u8()? as usize,
        STR16 => u16::from_le_bytes(reader.read_bytes(2)?.try_into().unwrap()) as usize,
        STR32 => u32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as usize,
        _ => return Err(SerdeErr::InvalidLeadByte { lead }),
    };
    let bytes = reader.read_bytes(length)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| SerdeErr::InvalidUtf8)
}

pub fn write_bool(writer: &mut ByteWriter, value: bool) {
    writer.write_u8(value as u8);
}

pub fn read_bool(reader: &mut ByteReader) -> Result<bool, SerdeErr> {
    match reader.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        byte => Err(SerdeErr::InvalidBool { byte }),
    }
}

/// Width of an explicitly sized primitive field. These always encode raw
/// little-endian at their declared width, without a selector prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedWidth {
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
}

pub fn write_fixed(writer: &mut ByteWriter, width: FixedWidth, value: f64) {
    match width {
        FixedWidth::Int8 => writer.write_u8((value as i8) as u8),
        FixedWidth::Uint8 => writer.write_u8(value as u8),
        FixedWidth::Int16 => writer.write_bytes(&(value as i16).to_le_bytes()),
        FixedWidth::Uint16 => writer.write_bytes(&(value as u16).to_le_bytes()),
        FixedWidth::Int32 => writer.write_bytes(&(value as i32).to_le_bytes()),
        FixedWidth::Uint32 => writer.write_bytes(&(value as u32).to_le_bytes()),
        FixedWidth::Int64 => writer.write_bytes(&(value as i64).to_le_bytes()),
        FixedWidth::Uint64 => writer.write_bytes(&(value as u64).to_le_bytes()),
        FixedWidth::Float32 => writer.write_bytes(&(value as f32).to_le_bytes()),
        FixedWidth::Float64 => writer.write_bytes(&value.to_le_bytes()),
    }
}

pub fn read_fixed(reader: &mut ByteReader, width: FixedWidth) -> Result<f64, SerdeErr> {
    Ok(match width {
        FixedWidth::Int8 => (reader.read_u8()? as i8) as f64,
        FixedWidth::Uint8 => reader.read_u8()? as f64,
        FixedWidth::Int16 => i16::from_le_bytes(reader.read_bytes(2)?.try_into().unwrap()) as f64,
        FixedWidth::Uint16 => u16::from_le_bytes(reader.read_bytes(2)?.try_into().unwrap()) as f64,
        FixedWidth::Int32 => i32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as f64,
        FixedWidth::Uint32 => u32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as f64,
        FixedWidth::Int64 => i64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap()) as f64,
        FixedWidth::Uint64 => u64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap()) as f64,
        FixedWidth::Float32 => f32::from_le_bytes(reader.read_bytes(4)?.try_into().unwrap()) as f64,
        FixedWidth::Float64 => f64::from_le_bytes(reader.read_bytes(8)?.try_into().unwrap()),
    })
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reader::ByteReader, writer::ByteWriter};

    fn round_trip_number(value: f64) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        write_number(&mut writer, value);
        let buffer = writer.to_bytes();

        let mut reader = ByteReader::new(&buffer);
        let out = read_number(&mut reader).unwrap();
        assert_eq!(value, out, "{} did not round-trip", value);
        assert!(reader.is_empty());
        buffer
    }

    #[test]
    fn read_write_numbers() {
        // Write
        let mut writer = ByteWriter::new();

        write_number(&mut writer, 0.0);
        write_number(&mut writer, 123.0);
        write_number(&mut writer, 535_221.0);
        write_number(&mut writer, -3.0);
        write_number(&mut writer, -668.0);
        write_number(&mut writer, 3.5);

        let buffer = writer.to_bytes();

        // Read
        let mut reader = ByteReader::new(&buffer);

        assert_eq!(read_number(&mut reader).unwrap(), 0.0);
        assert_eq!(read_number(&mut reader).unwrap(), 123.0);
        assert_eq!(read_number(&mut reader).unwrap(), 535_221.0);
        assert_eq!(read_number(&mut reader).unwrap(), -3.0);
        assert_eq!(read_number(&mut reader).unwrap(), -668.0);
        assert_eq!(read_number(&mut reader).unwrap(), 3.5);
        assert!(reader.is_empty());
    }

    #[test]
    fn width_promotion_boundaries() {
        // Last single-byte value and first promoted value on each side.
        assert_eq!(round_trip_number(127.0).len(), 1);
        assert_eq!(round_trip_number(128.0), vec![UINT8, 128]);
        assert_eq!(round_trip_number(-32.0).len(), 1);
        assert_eq!(round_trip_number(-33.0), vec![INT8, (-33i8) as u8]);

        assert_eq!(round_trip_number(255.0).len(), 2);
        assert_eq!(round_trip_number(256.0)[0], UINT16);
        assert_eq!(round_trip_number(65_535.0).len(), 3);
        assert_eq!(round_trip_number(65_536.0)[0], UINT32);
    }

    #[test]
    fn control_codes_never_lead_a_number() {
        // The control code values themselves, encoded as numbers, must be
        // promoted past the reserved byte range.
        for value in [NIL, END_OF_STRUCTURE, MOVE, TYPE_ID] {
            let bytes = round_trip_number(value as f64);
            assert_eq!(bytes[0], UINT8);
            assert!(is_number_lead(bytes[0]));
        }
    }

    #[test]
    fn large_and_fractional_numbers() {
        round_trip_number(4_294_967_296.0); // needs uint64
        round_trip_number(MAX_SAFE_INTEGER);
        round_trip_number(-2_147_483_649.0); // needs int64
        round_trip_number(0.25);
        round_trip_number(-12.75);
        round_trip_number(MAX_SAFE_INTEGER + 2.0); // falls back to float64
    }

    #[test]
    fn read_write_uint() {
        let mut writer = ByteWriter::new();
        write_uint(&mut writer, 5);
        write_uint(&mut writer, 300);
        write_uint(&mut writer, u64::MAX);
        let buffer = writer.to_bytes();

        let mut reader = ByteReader::new(&buffer);
        assert_eq!(read_uint(&mut reader).unwrap(), 5);
        assert_eq!(read_uint(&mut reader).unwrap(), 300);
        assert_eq!(read_uint(&mut reader).unwrap(), u64::MAX);
    }

    #[test]
    fn read_write_strings() {
        // Write
        let mut writer = ByteWriter::new();

        write_string(&mut writer, "");
        write_string(&mut writer, "hello");
        let at_boundary = "x".repeat(31);
        let past_boundary = "y".repeat(32);
        write_string(&mut writer, &at_boundary);
        write_string(&mut writer, &past_boundary);
        write_string(&mut writer, "ütf-8 ✓");

        let buffer = writer.to_bytes();

        // Read
        let mut reader = ByteReader::new(&buffer);

        assert_eq!(read_string(&mut reader).unwrap(), "");
        assert_eq!(read_string(&mut reader).unwrap(), "hello");
        assert_eq!(read_string(&mut reader).unwrap(), at_boundary);
        assert_eq!(read_string(&mut reader).unwrap(), past_boundary);
        assert_eq!(read_string(&mut reader).unwrap(), "ütf-8 ✓");
        assert!(reader.is_empty());
    }

    #[test]
    fn string_and_number_leads_are_disjoint() {
        for lead in 0..=255u8 {
            assert!(
                !(is_number_lead(lead) && is_string_lead(lead)),
                "lead {:#04x} is ambiguous",
                lead
            );
        }
        for code in [NIL, END_OF_STRUCTURE, MOVE, TYPE_ID] {
            assert!(!is_number_lead(code));
            assert!(!is_string_lead(code));
        }
    }

    #[test]
    fn read_write_bools() {
        let mut writer = ByteWriter::new();
        write_bool(&mut writer, true);
        write_bool(&mut writer, false);
        let buffer = writer.to_bytes();

        let mut reader = ByteReader::new(&buffer);
        assert!(read_bool(&mut reader).unwrap());
        assert!(!read_bool(&mut reader).unwrap());

        let bad = [7u8];
        let mut reader = ByteReader::new(&bad);
        assert_eq!(read_bool(&mut reader), Err(SerdeErr::InvalidBool { byte: 7 }));
    }

    #[test]
    fn read_write_fixed_widths() {
        let cases: &[(FixedWidth, f64, usize)] = &[
            (FixedWidth::Int8, -100.0, 1),
            (FixedWidth::Uint8, 200.0, 1),
            (FixedWidth::Int16, -30_000.0, 2),
            (FixedWidth::Uint16, 60_000.0, 2),
            (FixedWidth::Int32, -2_000_000_000.0, 4),
            (FixedWidth::Uint32, 4_000_000_000.0, 4),
            (FixedWidth::Int64, -5_000_000_000.0, 8),
            (FixedWidth::Uint64, 5_000_000_000.0, 8),
            (FixedWidth::Float32, 1.5, 4),
            (FixedWidth::Float64, -0.001, 8),
        ];

        for &(width, value, size) in cases {
            let mut writer = ByteWriter::new();
            write_fixed(&mut writer, width, value);
            let buffer = writer.to_bytes();
            assert_eq!(buffer.len(), size, "{:?} width", width);

            let mut reader = ByteReader::new(&buffer);
            assert_eq!(read_fixed(&mut reader, width).unwrap(), value);
        }
    }

    #[test]
    fn truncated_values_fail_cleanly() {
        let buffer = [UINT32, 0x01];
        let mut reader = ByteReader::new(&buffer);
        assert_eq!(read_number(&mut reader), Err(SerdeErr::UnexpectedEof));

        let buffer = [STR8, 10, b'a'];
        let mut reader = ByteReader::new(&buffer);
        assert_eq!(read_string(&mut reader), Err(SerdeErr::UnexpectedEof));

        let buffer = [NIL];
        let mut reader = ByteReader::new(&buffer);
        assert_eq!(
            read_number(&mut reader),
            Err(SerdeErr::InvalidLeadByte { lead: NIL })
        );
    }
}
