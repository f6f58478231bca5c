//! JSON line-protocol DTOs. `pvs-value`'s `Value` deliberately carries no
//! serde impl of its own,
//! so this module is where the demo listener's JSON shape is defined and
//! converted to/from the core types. A real deployment's transport would
//! have its own wire format here instead.

use std::{collections::BTreeMap, str::FromStr};

use anyhow::Context;
use num_bigint::BigInt;
use num_complex::Complex64;
use num_rational::{BigRational, Rational64};
use pvs_errors::ErrorMetadata;
use pvs_store::query::{Mark, QueryFlags, QueryPoint, StoreValuesQueryBuilder};
use pvs_value::{PointUuid, PointValueKind, State, StateGroup, StateValue, Value, VersionedValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WireValue {
    Boolean(bool),
    Signed64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    State(WireState),
    Tuple(Vec<WireValue>),
    Dict(BTreeMap<String, WireValue>),
    Rational { numer: i64, denom: i64 },
    BigRational { numer: String, denom: String },
    Complex { re: f64, im: f64 },
    Encrypted(Vec<u8>),
    Signed(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireState {
    pub code: Option<i64>,
    pub name: Option<String>,
}

impl From<&StateValue> for WireState {
    fn from(s: &StateValue) -> Self {
        WireState {
            code: s.code,
            name: s.name.clone(),
        }
    }
}

impl From<WireState> for StateValue {
    fn from(s: WireState) -> Self {
        StateValue {
            code: s.code,
            name: s.name,
        }
    }
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Boolean(b) => WireValue::Boolean(*b),
            Value::Signed64(n) => WireValue::Signed64(*n),
            Value::Float64(f) => WireValue::Float64(*f),
            Value::String(s) => WireValue::String(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::State(s) => WireValue::State(s.into()),
            Value::Tuple(items) => WireValue::Tuple(items.iter().map(WireValue::from).collect()),
            Value::Dict(map) => {
                WireValue::Dict(map.iter().map(|(k, v)| (k.clone(), WireValue::from(v))).collect())
            },
            Value::Rational(r) => WireValue::Rational {
                numer: *r.numer(),
                denom: *r.denom(),
            },
            Value::BigRational(r) => WireValue::BigRational {
                numer: r.numer().to_string(),
                denom: r.denom().to_string(),
            },
            Value::Complex(c) => WireValue::Complex { re: c.re, im: c.im },
            Value::Encrypted(b) => WireValue::Encrypted(b.clone()),
            Value::Signed(n) => WireValue::Signed(n.to_string()),
        }
    }
}

impl TryFrom<WireValue> for Value {
    type Error = anyhow::Error;

    fn try_from(wire: WireValue) -> anyhow::Result<Self> {
        Ok(match wire {
            WireValue::Boolean(b) => Value::Boolean(b),
            WireValue::Signed64(n) => Value::Signed64(n),
            WireValue::Float64(f) => Value::Float64(f),
            WireValue::String(s) => Value::String(s),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::State(s) => Value::State(s.into()),
            WireValue::Tuple(items) => Value::Tuple(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<anyhow::Result<Vec<_>>>()?,
            ),
            WireValue::Dict(map) => Value::Dict(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<anyhow::Result<BTreeMap<_, _>>>()?,
            ),
            WireValue::Rational { numer, denom } => Value::Rational(Rational64::new(numer, denom)),
            WireValue::BigRational { numer, denom } => Value::BigRational(BigRational::new(
                BigInt::from_str(&numer).context("invalid bigrational numerator")?,
                BigInt::from_str(&denom).context("invalid bigrational denominator")?,
            )),
            WireValue::Complex { re, im } => Value::Complex(Complex64::new(re, im)),
            WireValue::Encrypted(b) => Value::Encrypted(b),
            WireValue::Signed(n) => {
                Value::Signed(BigInt::from_str(&n).context("invalid signed integer")?)
            },
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireVersionedValue {
    pub point_uuid: Uuid,
    pub deleted: bool,
    pub stamp: i64,
    pub version: i64,
    pub kind: &'static str,
    pub value: Option<WireValue>,
    pub state: Option<WireState>,
}

impl From<&VersionedValue> for WireVersionedValue {
    fn from(v: &VersionedValue) -> Self {
        WireVersionedValue {
            point_uuid: v.point_uuid().to_uuid(),
            deleted: v.is_deleted(),
            stamp: v.stamp(),
            version: v.version,
            kind: match v.kind {
                PointValueKind::Value => "value",
                PointValueKind::Deleted => "deleted",
                PointValueKind::Purged => "purged",
            },
            value: v.point_value.value.as_ref().map(WireValue::from),
            state: v.point_value.state.as_ref().map(WireState::from),
        }
    }
}

/// One `select`/`pull`/`subscribe` query, in the JSON shape a caller sends
/// over the line protocol. `flags` is the raw [`QueryFlags`] bitmask so the
/// full normalization pipeline in `pvs-store` runs unchanged; a richer
/// transport would expose named booleans instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireQuery {
    pub point_uuid: Uuid,
    #[serde(default)]
    pub after: Option<i64>,
    #[serde(default)]
    pub before: Option<i64>,
    #[serde(default)]
    pub rows: Option<i32>,
    #[serde(default)]
    pub limit: i32,
    #[serde(default)]
    pub flags: u32,
}

impl WireQuery {
    pub fn into_query(self) -> anyhow::Result<pvs_store::StoreValuesQuery> {
        let mut builder = StoreValuesQueryBuilder::new()
            .point(QueryPoint::Uuid(PointUuid::from_uuid(self.point_uuid)), false)
            .limit(self.limit);
        if let Some(after) = self.after {
            builder = builder.after(after);
        }
        if let Some(before) = self.before {
            builder = builder.before(before);
        }
        if let Some(rows) = self.rows {
            builder = builder.rows(rows);
        }
        builder = builder.flag(QueryFlags::from_bits_truncate(self.flags));
        builder.build()
    }

    /// Rebuild the follow-up query for a pagination `Mark`. It's
    /// reconstructed from the mark's own state rather than replaying the
    /// caller's original request.
    pub fn continuation(mark: &Mark) -> pvs_store::StoreValuesQuery {
        mark.create_query()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireResponse {
    pub values: Vec<WireVersionedValue>,
    pub count: Option<u64>,
    pub exception: Option<String>,
    pub has_more: bool,
}

impl From<pvs_store::StoreValuesResponse> for WireResponse {
    fn from(response: pvs_store::StoreValuesResponse) -> Self {
        WireResponse {
            values: response.values.iter().map(WireVersionedValue::from).collect(),
            count: response.count,
            exception: response.exception,
            has_more: response.mark.is_some(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireStateGroup {
    pub name: String,
    pub states: Vec<WireState2>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireState2 {
    pub code: i64,
    pub name: String,
}

impl From<StateGroup> for WireStateGroup {
    fn from(group: StateGroup) -> Self {
        WireStateGroup {
            name: group.name,
            states: group
                .states
                .into_iter()
                .map(|State { code, name }| WireState2 { code, name })
                .collect(),
        }
    }
}

/// Classify an `anyhow::Error` down to a short string for the JSON response;
/// mirrors the session RPC surface's per-element exception slot.
pub fn describe_error(err: &anyhow::Error) -> String {
    err.downcast_ref::<ErrorMetadata>()
        .map(|m| m.msg.to_string())
        .unwrap_or_else(|| err.to_string())
}
