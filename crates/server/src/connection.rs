//! Drives one TCP connection: reads newline-delimited JSON requests, applies
//! them to a [`pvs_session::Session`], and writes back newline-delimited JSON
//! replies. A background task forwards the session's own `deliver` queue as
//! unsolicited pushes (`id: null`) whenever the caller is blocked on
//! `Deliver`. This is the "trivial line-oriented local listener" the core's
//! scope note expects a caller to supply -- not a wire protocol
//! the core itself defines.

use std::sync::Arc;

use anyhow::Context;
use pvs_common::Interval;
use pvs_session::Session;
use pvs_store::{binding::BindRequest, PendingUpdate};
use pvs_value::{PointUuid, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use crate::{
    request::{Envelope, Reply, Request},
    wire::{describe_error, WireResponse, WireStateGroup, WireVersionedValue},
};

pub async fn handle_connection(stream: TcpStream, session: Arc<Session>) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let result = async {
        while let Some(line) = lines.next_line().await.context("reading from socket")? {
            if line.trim().is_empty() {
                continue;
            }
            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    let reply = serde_json::json!({ "id": null, "errors": [format!("malformed request: {e}")] });
                    write_half.write_all(reply.to_string().as_bytes()).await?;
                    write_half.write_all(b"\n").await?;
                    continue;
                },
            };
            let id = envelope.id;
            let reply = dispatch(&session, envelope.request).await;
            let mut reply = reply;
            reply.id = id;
            let serialized = serde_json::to_string(&reply).context("serializing reply")?;
            write_half.write_all(serialized.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    session.close();
    result
}

async fn dispatch(session: &Session, request: Request) -> Reply {
    match request {
        Request::Impersonate { user } => {
            session.impersonate(user);
            Reply::default()
        },
        Request::Probe => Reply {
            probe: Some(session.probe()),
            ..Default::default()
        },
        Request::SupportedValueTypeCodes => Reply {
            supported_value_type_codes: Some(session.supported_value_type_codes()),
            ..Default::default()
        },
        Request::GetStateGroups => Reply {
            state_groups: Some(session.get_state_groups().into_iter().map(WireStateGroup::from).collect()),
            ..Default::default()
        },
        Request::Resolve { group, state } => match session.resolve(&group, state.into()) {
            Ok(resolved) => Reply {
                state: Some((&resolved).into()),
                ..Default::default()
            },
            Err(e) => Reply {
                errors: Some(vec![Some(describe_error(&e))]),
                ..Default::default()
            },
        },
        Request::Update { updates } => {
            let pending: Vec<PendingUpdate> = updates
                .into_iter()
                .map(|u| {
                    Ok::<_, anyhow::Error>(PendingUpdate {
                        point_uuid: PointUuid::from_uuid(u.point_uuid),
                        stamp: u.stamp,
                        state: u.state.map(Into::into),
                        value: u.value.map(Value::try_from).transpose()?,
                    })
                })
                .collect::<anyhow::Result<_>>()
                .unwrap_or_default();
            let results = session.update(pending).await;
            Reply {
                errors: Some(results.into_iter().map(|r| r.err().map(|e| describe_error(&e))).collect()),
                ..Default::default()
            }
        },
        Request::Select { queries } => {
            let built: anyhow::Result<Vec<_>> = queries.into_iter().map(|q| q.into_query()).collect();
            match built {
                Ok(queries) => {
                    let responses = session.select(queries).await;
                    Reply {
                        responses: Some(responses.into_iter().map(WireResponse::from).collect()),
                        ..Default::default()
                    }
                },
                Err(e) => Reply {
                    errors: Some(vec![Some(describe_error(&e))]),
                    ..Default::default()
                },
            }
        },
        Request::Pull { query, timeout_ms } => match query.into_query() {
            Ok(query) => match session.pull(query, timeout_ms).await {
                Ok(response) => Reply {
                    responses: Some(vec![WireResponse::from(response)]),
                    ..Default::default()
                },
                Err(e) => Reply {
                    errors: Some(vec![Some(describe_error(&e))]),
                    ..Default::default()
                },
            },
            Err(e) => Reply {
                errors: Some(vec![Some(describe_error(&e))]),
                ..Default::default()
            },
        },
        Request::Subscribe { point_uuids } => {
            let uuids: Vec<PointUuid> = point_uuids.into_iter().map(PointUuid::from_uuid).collect();
            let outcomes = session.subscribe(uuids).await;
            let mut responses = Vec::with_capacity(outcomes.len());
            let mut errors = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                match outcome {
                    Ok(r) => {
                        responses.push(WireResponse::from(r));
                        errors.push(None);
                    },
                    Err(e) => {
                        responses.push(WireResponse::default());
                        errors.push(Some(describe_error(&e)));
                    },
                }
            }
            Reply {
                responses: Some(responses),
                errors: Some(errors),
                ..Default::default()
            }
        },
        Request::Unsubscribe { point_uuids } => {
            let uuids: Vec<PointUuid> = point_uuids.into_iter().map(PointUuid::from_uuid).collect();
            let results = session.unsubscribe(uuids);
            Reply {
                errors: Some(results.into_iter().map(|r| r.err().map(|e| describe_error(&e))).collect()),
                ..Default::default()
            }
        },
        Request::Deliver { limit, timeout_ms } => match session.deliver(limit, timeout_ms).await {
            Ok(values) => Reply {
                delivered: Some(values.iter().map(WireVersionedValue::from).collect()),
                ..Default::default()
            },
            Err(e) => Reply {
                errors: Some(vec![Some(describe_error(&e))]),
                ..Default::default()
            },
        },
        Request::Interrupt => {
            session.interrupt();
            Reply::default()
        },
        Request::Purge {
            point_uuids,
            after,
            before,
        } => {
            let uuids: Vec<PointUuid> = point_uuids.into_iter().map(PointUuid::from_uuid).collect();
            let interval = Interval::new(after, before);
            let results = session.purge(uuids, interval).await;
            let mut counts = Vec::with_capacity(results.len());
            let mut errors = Vec::with_capacity(results.len());
            for result in results {
                match result {
                    Ok(n) => {
                        counts.push(Some(n));
                        errors.push(None);
                    },
                    Err(e) => {
                        counts.push(None);
                        errors.push(Some(describe_error(&e)));
                    },
                }
            }
            Reply {
                counts: Some(counts),
                errors: Some(errors),
                ..Default::default()
            }
        },
        Request::Bind { requests } => {
            let requests: Vec<BindRequest> = requests
                .into_iter()
                .map(|r| BindRequest {
                    server_uuid: PointUuid::from_uuid(r.server_uuid),
                    name: r.name,
                    client_uuid: PointUuid::from_uuid(r.client_uuid),
                })
                .collect();
            let results = session.get_point_bindings(requests);
            Reply {
                errors: Some(results.into_iter().map(|r| r.err().map(|e| describe_error(&e))).collect()),
                ..Default::default()
            }
        },
    }
}
