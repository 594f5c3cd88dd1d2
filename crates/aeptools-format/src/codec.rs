//! Scalar and string primitives on top of the common reader/writer.

use aeptools_common::{BinaryReader, BinaryWriter};

use crate::document::Value;
use crate::schema::ScalarType;
use crate::{Error, Result};

/// Read one scalar of the given type at the reader's position.
pub fn read_scalar(reader: &mut BinaryReader<'_>, ty: ScalarType) -> Result<Value> {
    Ok(match ty {
        ScalarType::I8 => Value::I8(reader.read_i8()?),
        ScalarType::U8 => Value::U8(reader.read_u8()?),
        ScalarType::I16 => Value::I16(reader.read_i16()?),
        ScalarType::U16 => Value::U16(reader.read_u16()?),
        ScalarType::I32 => Value::I32(reader.read_i32()?),
        ScalarType::U32 => Value::U32(reader.read_u32()?),
        ScalarType::I64 => Value::I64(reader.read_i64()?),
        ScalarType::U64 => Value::U64(reader.read_u64()?),
        ScalarType::F32 => Value::F32(reader.read_f32()?),
        ScalarType::F64 => Value::F64(reader.read_f64()?),
        ScalarType::Bool => Value::Bool(reader.read_bool()?),
    })
}

/// Write one scalar value.
///
/// Non-scalar values are rejected with a `Layout` error; callers validate
/// value types against the schema before writing.
pub fn write_scalar(writer: &mut BinaryWriter, value: &Value) -> Result<()> {
    match *value {
        Value::I8(v) => writer.write_i8(v)?,
        Value::U8(v) => writer.write_u8(v)?,
        Value::I16(v) => writer.write_i16(v)?,
        Value::U16(v) => writer.write_u16(v)?,
        Value::I32(v) => writer.write_i32(v)?,
        Value::U32(v) => writer.write_u32(v)?,
        Value::I64(v) => writer.write_i64(v)?,
        Value::U64(v) => writer.write_u64(v)?,
        Value::F32(v) => writer.write_f32(v)?,
        Value::F64(v) => writer.write_f64(v)?,
        Value::Bool(v) => writer.write_bool(v)?,
        _ => return Err(Error::Layout(format!("{:?} is not a scalar", value))),
    }
    Ok(())
}

/// Read a null-terminated UTF-8 string starting at `offset`.
pub fn read_cstring_at(data: &[u8], offset: usize) -> Result<String> {
    if offset >= data.len() {
        return Err(Error::TruncatedData {
            offset,
            needed: 1,
            available: 0,
        });
    }
    let mut reader = BinaryReader::new_at(data, offset);
    Ok(reader.read_cstring()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip_all_types() {
        let values = [
            Value::I8(-5),
            Value::U8(200),
            Value::I16(-30000),
            Value::U16(60000),
            Value::I32(-1),
            Value::U32(0xdead_beef),
            Value::I64(i64::MIN),
            Value::U64(u64::MAX),
            Value::F32(1.5),
            Value::F64(-0.25),
            Value::Bool(true),
        ];

        let mut writer = BinaryWriter::new();
        for value in &values {
            write_scalar(&mut writer, value).unwrap();
        }
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 1 + 1 + 2 + 2 + 4 + 4 + 8 + 8 + 4 + 8 + 1);

        let mut reader = BinaryReader::new(&bytes);
        for value in &values {
            let ty = value.scalar_type().unwrap();
            assert_eq!(&read_scalar(&mut reader, ty).unwrap(), value);
        }
        assert!(reader.is_empty());
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        let mut reader = BinaryReader::new(&[0x7f]);
        assert_eq!(read_scalar(&mut reader, ScalarType::Bool).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_write_scalar_rejects_compound() {
        let mut writer = BinaryWriter::new();
        assert!(write_scalar(&mut writer, &Value::string("x")).is_err());
    }

    #[test]
    fn test_cstring_at() {
        let data = b"xxhello\0";
        assert_eq!(read_cstring_at(data, 2).unwrap(), "hello");
        assert!(matches!(read_cstring_at(b"abc", 0), Err(Error::TruncatedData { .. })));
        assert!(matches!(read_cstring_at(b"abc", 3), Err(Error::TruncatedData { .. })));
    }
}
