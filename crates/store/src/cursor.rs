use pvs_auth::{Authorizer, Identity, Permission};
use pvs_errors::{ErrorKind, ErrorMetadata, ErrorMetadataAnyhowExt};
use pvs_metrics::StatusTimer;
use pvs_value::PointUuid;

use crate::{
    backend::{Order, ResetSpec, Responder},
    polator::PolatorRegistry,
    query::{normalize, Mark, QueryFlags, StoreValuesQuery, StoreValuesResponse},
};

pvs_metrics::register_pvs_status_histogram!(CURSOR_RESPONSE_SECONDS, "time spent building one query response");

/// Drives a [`Responder`] to fill one [`StoreValuesResponse`] for one
/// query.
pub struct Cursor {
    pub response_limit: i32,
    pub backend_limit: u32,
}

impl Cursor {
    pub fn new(response_limit: i32, backend_limit: u32) -> Self {
        Self {
            response_limit,
            backend_limit,
        }
    }

    /// Produce one response to `query`. Never returns `Err`: failures are
    /// embedded in the response instead -- the cursor never throws to the
    /// session layer.
    pub async fn create_response(
        &self,
        query: StoreValuesQuery,
        identity: &Identity,
        authorizer: &dyn Authorizer,
        polators: &dyn PolatorRegistry,
        responder: &mut dyn Responder,
    ) -> StoreValuesResponse {
        use tracing::Instrument;

        let mut timer = StatusTimer::new(&CURSOR_RESPONSE_SECONDS);
        let result = self
            .create_response_inner(query, identity, authorizer, polators, responder)
            .instrument(tracing::info_span!("cursor_create_response"))
            .await;
        match result {
            Ok(resp) => resp,
            Err(e) => {
                timer.set_status(pvs_errors::StatusCode::Failed);
                StoreValuesResponse::error(describe(&e))
            },
        }
    }

    async fn create_response_inner(
        &self,
        query: StoreValuesQuery,
        identity: &Identity,
        authorizer: &dyn Authorizer,
        polators: &dyn PolatorRegistry,
        responder: &mut dyn Responder,
    ) -> anyhow::Result<StoreValuesResponse> {
        if query.cancelled {
            return Ok(StoreValuesResponse::default());
        }

        // Step 1: permission check against the bound point, if any.
        if let Some(point) = &query.point {
            authorizer.check_point(identity, point.point_uuid(), Permission::READ)?;
        }

        // Step 2: polated queries must name a point.
        if query.is_polated() && query.point.is_none() {
            return Err(ErrorMetadata::illegal_argument(
                "a polated query must name a point",
            )
            .into());
        }

        if query.is_polated() && !query.is_count() {
            // Step 3: require an instant interval or a sync, and a bounded
            // endpoint on the query's direction.
            if !(query.interval.is_instant() || query.sync.is_some()) {
                return Err(ErrorMetadata::illegal_argument(
                    "a polated query requires an instant interval or a sync",
                )
                .into());
            }
            let bounded = if query.is_reverse() {
                query.interval.is_bounded_before()
            } else {
                query.interval.is_bounded_after()
            };
            if !bounded {
                return Err(ErrorMetadata::illegal_argument(
                    "a polated query requires a bounded endpoint on its direction",
                )
                .into());
            }

            // Step 4: delegate entirely to the point's polator.
            let point_uuid = query
                .point
                .as_ref()
                .expect("checked above")
                .point_uuid();
            let polator = polators
                .polator_for(point_uuid)
                .ok_or_else(|| ErrorMetadata::illegal_state("no polator configured for point"))?;
            return polator.polate(point_uuid, &query).await;
        }

        // Step 5: narrow the response limit.
        let response_limit = query.limited(self.response_limit);

        // Step 6: initialize counters and prepare the first iteration.
        let to_do = query.get_rows();
        let mut done = 0i32;
        let mut received: u32 = 0;
        let order = if query.is_reverse() {
            Order::Reverse
        } else {
            Order::Forward
        };
        let point_uuid = query.point.as_ref().map(|p| p.point_uuid());
        responder
            .reset(Some(ResetSpec {
                point_uuid,
                query: query.clone(),
                order,
            }))
            .await?;

        // Step 7: COUNT short-circuits the whole loop. Capped by the raw
        // `rows` field, not `get_rows()` -- an unset/zero `rows` means "no
        // cap" here, unlike the row-fetch default of 1.
        if query.is_count() {
            let count = responder.count().await?;
            let rows = query.rows;
            let capped = if rows > 0 && (rows as u64) < count {
                rows as u64
            } else {
                count
            };
            return Ok(StoreValuesResponse {
                count: Some(capped),
                ..Default::default()
            });
        }

        let mut values = Vec::new();
        loop {
            let Some(candidate) = responder.next().await? else {
                break;
            };
            received += 1;

            // Step 8: per-value filtering.
            let ignored = if query.flags.contains(QueryFlags::VALUE) && candidate.point_value.is_null() {
                true
            } else if query.is_synced()
                && query
                    .sync
                    .as_ref()
                    .is_some_and(|s| !s.is_in_sync(candidate.stamp()))
            {
                true
            } else if candidate.is_deleted() && !query.is_deleted() {
                true
            } else if query.point.is_none()
                && authorizer
                    .check_point(identity, candidate.point_uuid(), Permission::READ)
                    .is_err()
            {
                true
            } else {
                false
            };

            if ignored {
                if received >= self.backend_limit && self.backend_limit > 0 {
                    if !self
                        .rewind(responder, &query, order, &candidate, point_uuid)
                        .await?
                    {
                        break;
                    }
                    received = 0;
                }
                continue;
            }

            // Step 9: response-limit boundary produces a Mark.
            if done >= response_limit {
                let mark = Mark {
                    query: query.clone(),
                    next_point_uuid: Some(candidate.point_uuid()),
                    next_stamp: candidate.stamp(),
                    done_count: done,
                };
                return Ok(StoreValuesResponse {
                    values,
                    mark: Some(Box::new(mark)),
                    ..Default::default()
                });
            }

            let value = if query.flags.contains(QueryFlags::NORMALIZED) {
                normalize(candidate.clone())
            } else {
                candidate.clone()
            };
            values.push(value);
            done += 1;
            if done >= to_do {
                return Ok(StoreValuesResponse {
                    values,
                    ..Default::default()
                });
            }

            // Step 10: re-window once the backend's own fetch cap is hit.
            if self.backend_limit > 0 && received >= self.backend_limit {
                if !self
                    .rewind(responder, &query, order, &candidate, point_uuid)
                    .await?
                {
                    break;
                }
                received = 0;
            }
        }

        Ok(StoreValuesResponse {
            values,
            ..Default::default()
        })
    }

    /// Re-prepare the responder with a narrowed interval derived from the
    /// last value seen, continuing the same logical iteration across a
    /// backend batch boundary. Returns `false` when the
    /// new interval would be empty, signaling the caller to stop.
    async fn rewind(
        &self,
        responder: &mut dyn Responder,
        query: &StoreValuesQuery,
        order: Order,
        last: &pvs_value::VersionedValue,
        point_uuid: Option<PointUuid>,
    ) -> anyhow::Result<bool> {
        let pivot = if query.is_pull() { last.version } else { last.stamp() };
        let mut next_query = query.clone();
        next_query.interval = match order {
            Order::Forward => next_query.interval.after_stamp(pivot),
            Order::Reverse => next_query.interval.before_stamp(pivot),
        };
        if next_query.interval.is_empty() {
            return Ok(false);
        }
        responder
            .reset(Some(ResetSpec {
                point_uuid,
                query: next_query,
                order,
            }))
            .await?;
        Ok(true)
    }
}

fn describe(e: &anyhow::Error) -> String {
    match e.error_kind() {
        Some(kind) => format!("{}: {e}", kind_name(kind)),
        None => format!("{e}"),
    }
}

fn kind_name(kind: ErrorKind) -> &'static str {
    kind.as_str()
}

#[cfg(test)]
mod tests {
    use pvs_auth::InMemoryAuthorizer;
    use pvs_value::{Value, VersionedValue};

    use super::*;
    use crate::query::{QueryPoint, StoreValuesQueryBuilder};

    /// A fixed ordered list of rows, served in whatever order `reset` is
    /// asked to prepare -- no actual filtering, since these tests exercise
    /// the cursor's own row-budget logic, not a backend.
    #[derive(Default)]
    struct FixedResponder {
        rows: Vec<VersionedValue>,
        cursor: usize,
    }

    #[async_trait::async_trait]
    impl Responder for FixedResponder {
        async fn reset(&mut self, _spec: Option<ResetSpec>) -> anyhow::Result<()> {
            self.cursor = 0;
            Ok(())
        }

        async fn next(&mut self) -> anyhow::Result<Option<VersionedValue>> {
            let next = self.rows.get(self.cursor).cloned();
            if next.is_some() {
                self.cursor += 1;
            }
            Ok(next)
        }

        async fn count(&mut self) -> anyhow::Result<u64> {
            Ok(self.rows.len() as u64)
        }

        fn limit(&self) -> u32 {
            0
        }
    }

    struct NoPolators;

    impl PolatorRegistry for NoPolators {
        fn polator_for(&self, _point_uuid: PointUuid) -> Option<std::sync::Arc<dyn crate::polator::Polator>> {
            None
        }

        fn is_sync_capable(&self, _point_uuid: PointUuid) -> bool {
            false
        }
    }

    fn five_rows(uuid: PointUuid) -> Vec<VersionedValue> {
        (1..=5)
            .map(|i| VersionedValue::value(uuid, i, i, Value::Signed64(i)))
            .collect()
    }

    #[tokio::test]
    async fn count_with_rows_unset_is_not_capped_to_one() {
        let cursor = Cursor::new(1000, 0);
        let auth = InMemoryAuthorizer::new();
        let identity = Identity::anonymous();
        let uuid = PointUuid::new_v4();
        let mut responder = FixedResponder {
            rows: five_rows(uuid),
            cursor: 0,
        };

        let query = StoreValuesQueryBuilder::new()
            .point(QueryPoint::Uuid(uuid), false)
            .flag(QueryFlags::COUNT)
            .flag(QueryFlags::FORWARD)
            .after(0)
            .build()
            .unwrap();

        let response = cursor
            .create_response(query, &identity, &auth, &NoPolators, &mut responder)
            .await;
        assert_eq!(response.count, Some(5));
    }

    #[tokio::test]
    async fn count_with_rows_set_below_the_total_caps_the_count() {
        let cursor = Cursor::new(1000, 0);
        let auth = InMemoryAuthorizer::new();
        let identity = Identity::anonymous();
        let uuid = PointUuid::new_v4();
        let mut responder = FixedResponder {
            rows: five_rows(uuid),
            cursor: 0,
        };

        let query = StoreValuesQueryBuilder::new()
            .point(QueryPoint::Uuid(uuid), false)
            .flag(QueryFlags::COUNT)
            .flag(QueryFlags::FORWARD)
            .after(0)
            .rows(3)
            .build()
            .unwrap();

        let response = cursor
            .create_response(query, &identity, &auth, &NoPolators, &mut responder)
            .await;
        assert_eq!(response.count, Some(3));
    }
}
