//! The request/response envelope for the demo line protocol: one JSON object
//! per line in, one JSON object per line out. Every request carries an `id`
//! the caller chooses so it can match up unsolicited `deliver` pushes (sent
//! with `id: null`) against its own requests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wire::{WireQuery, WireResponse, WireState, WireStateGroup, WireVersionedValue};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    Impersonate { user: Option<String> },
    Probe,
    SupportedValueTypeCodes,
    GetStateGroups,
    Resolve { group: String, state: WireState },
    Update { updates: Vec<WireUpdate> },
    Select { queries: Vec<WireQuery> },
    Pull { query: WireQuery, timeout_ms: u64 },
    Subscribe { point_uuids: Vec<Uuid> },
    Unsubscribe { point_uuids: Vec<Uuid> },
    Deliver { limit: u32, timeout_ms: u64 },
    Interrupt,
    Purge { point_uuids: Vec<Uuid>, after: Option<i64>, before: Option<i64> },
    Bind { requests: Vec<WireBindRequest> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireUpdate {
    pub point_uuid: Uuid,
    pub stamp: i64,
    pub state: Option<WireState>,
    pub value: Option<crate::wire::WireValue>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireBindRequest {
    pub server_uuid: Uuid,
    pub name: String,
    pub client_uuid: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Option<u64>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Reply {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_value_type_codes: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_groups: Option<Vec<WireStateGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<WireState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<WireResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<Vec<WireVersionedValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<Option<u64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Option<String>>>,
}
