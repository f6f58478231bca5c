//! Binary encoding for [`Value`] payloads stored in the `value_blob` column.
//! Self-contained and versioned by the `type_code` column already sitting
//! alongside it -- a format as close to the wire type codes as
//! a storage-only encoding can get without actually being the wire format.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    str::FromStr,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::{BigRational, Rational64};
use pvs_errors::ErrorMetadata;
use pvs_value::{type_code, StateValue, Value};

pub fn encode_value(value: &Value) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

pub fn decode_value(code: u8, bytes: &[u8]) -> anyhow::Result<Value> {
    let mut cursor = Cursor::new(bytes);
    read_value(&mut cursor, code)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> anyhow::Result<()> {
    match value {
        Value::Boolean(b) => buf.write_u8(*b as u8)?,
        Value::Signed64(n) => buf.write_i64::<BigEndian>(*n)?,
        Value::Float64(f) => buf.write_f64::<BigEndian>(*f)?,
        Value::String(s) => write_bytes(buf, s.as_bytes())?,
        Value::Bytes(b) => write_bytes(buf, b)?,
        Value::Encrypted(b) => write_bytes(buf, b)?,
        Value::Signed(n) => write_bytes(buf, n.to_string().as_bytes())?,
        Value::Rational(r) => {
            buf.write_i64::<BigEndian>(*r.numer())?;
            buf.write_i64::<BigEndian>(*r.denom())?;
        },
        Value::BigRational(r) => write_bytes(buf, r.to_string().as_bytes())?,
        Value::Complex(c) => {
            buf.write_f64::<BigEndian>(c.re)?;
            buf.write_f64::<BigEndian>(c.im)?;
        },
        Value::State(s) => {
            buf.write_u8(s.code.is_some() as u8)?;
            if let Some(code) = s.code {
                buf.write_i64::<BigEndian>(code)?;
            }
            buf.write_u8(s.name.is_some() as u8)?;
            if let Some(name) = &s.name {
                write_bytes(buf, name.as_bytes())?;
            }
        },
        Value::Tuple(items) => {
            buf.write_u32::<BigEndian>(items.len() as u32)?;
            for item in items {
                buf.write_u8(item.type_code())?;
                write_value(buf, item)?;
            }
        },
        Value::Dict(map) => {
            buf.write_u32::<BigEndian>(map.len() as u32)?;
            for (k, v) in map {
                write_bytes(buf, k.as_bytes())?;
                buf.write_u8(v.type_code())?;
                write_value(buf, v)?;
            }
        },
    }
    Ok(())
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> anyhow::Result<()> {
    buf.write_u32::<BigEndian>(bytes.len() as u32)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_value(cursor: &mut Cursor<&[u8]>, code: u8) -> anyhow::Result<Value> {
    Ok(match code {
        c if c == type_code::BOOLEAN => Value::Boolean(cursor.read_u8()? != 0),
        c if c == type_code::SIGNED64 => Value::Signed64(cursor.read_i64::<BigEndian>()?),
        c if c == type_code::FLOAT64 => Value::Float64(cursor.read_f64::<BigEndian>()?),
        c if c == type_code::STRING => Value::String(String::from_utf8(read_bytes(cursor)?)?),
        c if c == type_code::BYTES => Value::Bytes(read_bytes(cursor)?),
        c if c == type_code::ENCRYPTED => Value::Encrypted(read_bytes(cursor)?),
        c if c == type_code::SIGNED => {
            Value::Signed(BigInt::from_str(&String::from_utf8(read_bytes(cursor)?)?)?)
        },
        c if c == type_code::RATIONAL => Value::Rational(Rational64::new(
            cursor.read_i64::<BigEndian>()?,
            cursor.read_i64::<BigEndian>()?,
        )),
        c if c == type_code::BIG_RATIONAL => {
            Value::BigRational(BigRational::from_str(&String::from_utf8(read_bytes(cursor)?)?)?)
        },
        c if c == type_code::COMPLEX => Value::Complex(Complex64::new(
            cursor.read_f64::<BigEndian>()?,
            cursor.read_f64::<BigEndian>()?,
        )),
        c if c == type_code::STATE => {
            let code = if cursor.read_u8()? != 0 {
                Some(cursor.read_i64::<BigEndian>()?)
            } else {
                None
            };
            let name = if cursor.read_u8()? != 0 {
                Some(String::from_utf8(read_bytes(cursor)?)?)
            } else {
                None
            };
            Value::State(StateValue { code, name })
        },
        c if c == type_code::TUPLE => {
            let len = cursor.read_u32::<BigEndian>()?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                let item_code = cursor.read_u8()?;
                items.push(read_value(cursor, item_code)?);
            }
            Value::Tuple(items)
        },
        c if c == type_code::DICT => {
            let len = cursor.read_u32::<BigEndian>()?;
            let mut map = BTreeMap::new();
            for _ in 0..len {
                let key = String::from_utf8(read_bytes(cursor)?)?;
                let item_code = cursor.read_u8()?;
                map.insert(key, read_value(cursor, item_code)?);
            }
            Value::Dict(map)
        },
        other => {
            return Err(ErrorMetadata::illegal_argument(format!(
                "unrecognized stored value type code {other:?}"
            ))
            .into())
        },
    })
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> anyhow::Result<Vec<u8>> {
    let len = cursor.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use pvs_value::State;

    use super::*;

    fn roundtrip(value: Value) {
        let code = value.type_code();
        let encoded = encode_value(&value).unwrap();
        let decoded = decode_value(code, &encoded).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn scalar_variants_round_trip() {
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Signed64(-42));
        roundtrip(Value::Float64(3.5));
        roundtrip(Value::String("hello".into()));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn nested_variants_round_trip() {
        roundtrip(Value::Tuple(vec![Value::Signed64(1), Value::String("a".into())]));
        let mut dict = std::collections::BTreeMap::new();
        dict.insert("a".to_string(), Value::Signed64(1));
        roundtrip(Value::Dict(dict));
        roundtrip(Value::State(StateValue::resolved(1, "ON")));
        let _ = State {
            code: 1,
            name: "ON".into(),
        };
    }

    #[test]
    fn numeric_variants_round_trip() {
        roundtrip(Value::Rational(num_rational::Rational64::new(1, 3)));
        roundtrip(Value::Signed(num_bigint::BigInt::from(123_456_789_i64)));
    }
}
