use std::{cmp::Ordering, collections::BTreeMap};

use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::{BigRational, Rational64};
use pvs_errors::ErrorMetadata;

use crate::state::StateValue;

/// The tagged union every point value's `value` field holds. The
/// enumerated set is closed by design -- unknown type codes must error out
/// rather than silently deserialize, so there is deliberately no catch-all
/// variant.
#[derive(Clone, Debug)]
pub enum Value {
    Boolean(bool),
    Signed64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    State(StateValue),
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    Rational(Rational64),
    BigRational(BigRational),
    Complex(Complex64),
    Encrypted(Vec<u8>),
    Signed(BigInt),
}

/// Single-byte wire codes for each variant. `O` (generic
/// object) is reserved on the wire but never produced by this
/// implementation; [`Value::from_type_code`] rejects it along with any
/// other unrecognized byte.
pub mod type_code {
    pub const BOOLEAN: u8 = b'B';
    pub const FLOAT64: u8 = b'D';
    pub const SIGNED64: u8 = b'L';
    pub const STRING: u8 = b'S';
    pub const BYTES: u8 = b'Y';
    pub const TUPLE: u8 = b'T';
    pub const DICT: u8 = b'H';
    pub const RATIONAL: u8 = b'Q';
    pub const BIG_RATIONAL: u8 = b'G';
    pub const COMPLEX: u8 = b'C';
    pub const ENCRYPTED: u8 = b'X';
    pub const SIGNED: u8 = b'N';
    pub const STATE: u8 = b'V';
    pub const GENERIC_OBJECT: u8 = b'O';

    /// The concatenation of every code this implementation's value union
    /// admits, in declaration order -- what `supportedValueTypeCodes`
    /// returns by default.
    pub const ALL: &str = "BDLSYTHQGCXNV";
}

impl Value {
    pub fn type_code(&self) -> u8 {
        match self {
            Value::Boolean(_) => type_code::BOOLEAN,
            Value::Float64(_) => type_code::FLOAT64,
            Value::Signed64(_) => type_code::SIGNED64,
            Value::String(_) => type_code::STRING,
            Value::Bytes(_) => type_code::BYTES,
            Value::Tuple(_) => type_code::TUPLE,
            Value::Dict(_) => type_code::DICT,
            Value::Rational(_) => type_code::RATIONAL,
            Value::BigRational(_) => type_code::BIG_RATIONAL,
            Value::Complex(_) => type_code::COMPLEX,
            Value::Encrypted(_) => type_code::ENCRYPTED,
            Value::Signed(_) => type_code::SIGNED,
            Value::State(_) => type_code::STATE,
        }
    }

    /// Reject any code outside the enumerated union up front: an unknown
    /// type code is a hard error, not a silently-dropped value.
    /// The core never constructs a `Value` from a raw code directly -- the
    /// wire layer does -- but this is where that check lives so every
    /// caller gets it for free.
    pub fn check_type_code(code: u8) -> anyhow::Result<()> {
        if type_code::ALL.as_bytes().contains(&code) {
            Ok(())
        } else {
            Err(ErrorMetadata::illegal_argument(format!(
                "unrecognized value type code {:?}",
                code as char
            ))
            .into())
        }
    }
}

/// Ordering key: type code first (so the whole union is totally ordered
/// even across incomparable kinds), then the natural order within a type --
/// lets callers sort mixed-type collections deterministically (useful for
/// test fixtures). Floats use [`f64::total_cmp`] so `Ord` is total even in
/// the presence of NaN.
impl Value {
    fn cmp_same_variant(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Signed64(a), Value::Signed64(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) => a.cmp(b),
            (Value::Dict(a), Value::Dict(b)) => a.cmp(b),
            (Value::Rational(a), Value::Rational(b)) => a.cmp(b),
            (Value::BigRational(a), Value::BigRational(b)) => a.cmp(b),
            (Value::Complex(a), Value::Complex(b)) => a
                .re
                .total_cmp(&b.re)
                .then_with(|| a.im.total_cmp(&b.im)),
            (Value::Encrypted(a), Value::Encrypted(b)) => a.cmp(b),
            (Value::Signed(a), Value::Signed(b)) => a.cmp(b),
            (Value::State(a), Value::State(b)) => a.cmp(b),
            _ => unreachable!("cmp_same_variant called across variants"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_code()
            .cmp(&other.type_code())
            .then_with(|| self.cmp_same_variant(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_match_known_bytes() {
        assert_eq!(Value::Boolean(true).type_code(), b'B');
        assert_eq!(Value::Float64(1.0).type_code(), b'D');
        assert_eq!(Value::Signed64(1).type_code(), b'L');
        assert_eq!(Value::String("x".into()).type_code(), b'S');
        assert_eq!(Value::Bytes(vec![]).type_code(), b'Y');
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(Value::check_type_code(b'O').is_err());
        assert!(Value::check_type_code(b'Z').is_err());
        assert!(Value::check_type_code(b'B').is_ok());
    }

    #[test]
    fn ordering_is_total_across_variants() {
        let mut values = vec![
            Value::String("b".into()),
            Value::Boolean(true),
            Value::Signed64(5),
            Value::String("a".into()),
        ];
        values.sort();
        assert_eq!(values[0].type_code(), b'B');
    }

    #[test]
    fn float_ordering_handles_nan_without_panicking() {
        let nan = Value::Float64(f64::NAN);
        let one = Value::Float64(1.0);
        // total_cmp gives a well-defined (if unintuitive) order; the point is it
        // never panics and is reflexive.
        assert_eq!(nan.cmp(&nan), Ordering::Equal);
        let _ = nan.cmp(&one);
    }
}
