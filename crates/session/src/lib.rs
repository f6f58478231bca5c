//! One connection's view onto the store core: a plain struct
//! with one method per RPC operation, wiring together the cursor, the
//! subscription/updater/archiver pipelines, point bindings, and state group
//! resolution behind a single per-session entry point. Transport binding
//! (remote method invocation, wire encoding) is out of this crate's scope
//!; a caller drives [`Session`] directly.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use pvs_auth::{Authorizer, Identity, Permission};
use pvs_common::Interval;
use pvs_errors::ErrorMetadata;
use pvs_store::{
    archiver::LifeTimeConfig,
    binding::{BindRequest, PointBinding},
    polator::PolatorRegistry,
    query::{Mark, QueryPoint, StoreValuesQueryBuilder},
    Archiver, Backend, Cursor, Notifier, PendingUpdate, PointBindingIndex, PointMetadata,
    Replicator, StateGroupResolver, StoreValuesQuery, StoreValuesResponse, SubscriptionManager,
    SuspendGate, Updater,
};
use pvs_value::{PointUuid, StateGroup, StateValue};

/// What a point's metadata loader plugs in: per-point update classification
/// and the set of points swept on a schedule by the archiver. Out of this
/// crate's scope to implement;
/// a deployment supplies whatever configuration store backs it.
pub trait MetadataStore: Send + Sync {
    fn point_metadata(&self, point_uuid: PointUuid) -> Option<PointMetadata>;

    fn life_times(&self) -> Vec<LifeTimeConfig>;
}

/// A [`MetadataStore`] with nothing configured: every point is unknown and
/// no life-time sweeps run. Useful for tests and for a deployment that
/// hasn't wired up a metadata loader yet.
#[derive(Default)]
pub struct EmptyMetadataStore;

impl MetadataStore for EmptyMetadataStore {
    fn point_metadata(&self, _point_uuid: PointUuid) -> Option<PointMetadata> {
        None
    }

    fn life_times(&self) -> Vec<LifeTimeConfig> {
        Vec::new()
    }
}

/// Which optional operations this deployment admits
/// (`supportsCount/Delete/Deliver/Pull/Purge/Subscribe()`). A capability a
/// backend or configuration doesn't support fails its operation with
/// `ServiceNotAvailable` rather than silently no-opping.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    pub count: bool,
    pub delete: bool,
    pub deliver: bool,
    pub pull: bool,
    pub purge: bool,
    pub subscribe: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            count: true,
            delete: true,
            deliver: true,
            pull: true,
            purge: true,
            subscribe: true,
        }
    }
}

/// Everything a single connection's [`Session`] shares with every other
/// session against the same store: the backend, the
/// permission table, the update pipeline's shared collaborators, and the
/// server-wide configuration (`response.limit`, `pull.sleep`, ...).
pub struct StoreCore {
    pub backend: Arc<dyn Backend>,
    pub authorizer: Arc<dyn Authorizer>,
    pub polators: Arc<dyn PolatorRegistry>,
    pub metadata: Arc<dyn MetadataStore>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub state_groups: Arc<StateGroupResolver>,
    pub bindings: Arc<PointBindingIndex>,
    pub notifier: Arc<Notifier>,
    pub replicator: Arc<Replicator>,
    pub archiver: Arc<Archiver>,
    pub suspend_gate: Arc<SuspendGate>,
    pub cursor: Cursor,
    pub capabilities: Capabilities,
    /// `null.removes` store default.
    pub store_null_removes: bool,
    /// `drop.deleted`: suppress tombstone rows on delete.
    pub drop_deleted: bool,
    /// `pull.sleep`.
    pub pull_sleep: Duration,
    /// `pull.disabled`.
    pub pull_disabled: bool,
}

impl StoreCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn Backend>,
        authorizer: Arc<dyn Authorizer>,
        polators: Arc<dyn PolatorRegistry>,
        metadata: Arc<dyn MetadataStore>,
        response_limit: i32,
        backend_limit: u32,
    ) -> Self {
        Self {
            backend,
            authorizer,
            polators,
            metadata,
            subscriptions: Arc::new(SubscriptionManager::default()),
            state_groups: Arc::new(StateGroupResolver::new()),
            bindings: Arc::new(PointBindingIndex::new()),
            notifier: Arc::new(Notifier::new()),
            replicator: Arc::new(Replicator::new()),
            archiver: Arc::new(Archiver::new(None)),
            suspend_gate: Arc::new(SuspendGate::new()),
            cursor: Cursor::new(response_limit, backend_limit),
            capabilities: Capabilities::default(),
            store_null_removes: false,
            drop_deleted: false,
            pull_sleep: Duration::from_secs(60),
            pull_disabled: false,
        }
    }
}

/// Subscribe the store core's own [`SubscriptionManager`] to its
/// [`Notifier`] so committed writes reach every session's delivery queue
///. Call once
/// after constructing a [`StoreCore`], before any session starts updating.
pub fn wire_notifier_to_subscriptions(core: &StoreCore) {
    core.notifier
        .add_listener(core.subscriptions.clone(), 1000);
}

/// A session identifier, handed out by whatever transport accepts
/// connections; opaque to this crate beyond being hashable.
pub type SessionId = u64;

/// Per-connection RPC surface. Cheap to construct: all shared
/// state lives in [`StoreCore`]; a `Session` only owns its own identity and
/// its own [`Updater`] (stateless beyond the shared suspend gate).
pub struct Session {
    core: Arc<StoreCore>,
    session_id: SessionId,
    identity: RwLock<Identity>,
    updater: Updater,
}

impl Session {
    pub fn new(core: Arc<StoreCore>, session_id: SessionId, identity: Identity) -> Self {
        let updater = Updater::new(core.suspend_gate.clone(), core.store_null_removes)
            .with_drop_deleted(core.drop_deleted);
        Self {
            core,
            session_id,
            identity: RwLock::new(identity),
            updater,
        }
    }

    fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// `deliver(limit, timeout_ms)`.
    pub async fn deliver(&self, limit: u32, timeout_ms: u64) -> anyhow::Result<Vec<pvs_value::VersionedValue>> {
        if !self.core.capabilities.deliver {
            return Err(ErrorMetadata::service_not_available("deliver is not supported").into());
        }
        self.core
            .subscriptions
            .deliver(self.session_id, limit as usize, Duration::from_millis(timeout_ms))
            .await
    }

    /// `getPointBindings(requests)`, the RPC-surface name for the point
    /// binding index's `bind` operation.
    pub fn get_point_bindings(&self, requests: Vec<BindRequest>) -> Vec<anyhow::Result<PointBinding>> {
        self.core.bindings.bind(requests)
    }

    /// `getStateGroups()`.
    pub fn get_state_groups(&self) -> Vec<StateGroup> {
        self.core.state_groups.groups()
    }

    /// `impersonate(user?)`: switch this session's identity; `None` reverts
    /// to anonymous.
    pub fn impersonate(&self, user: Option<String>) {
        *self.identity.write() = match user {
            Some(u) => Identity::new(u),
            None => Identity::anonymous(),
        };
    }

    /// `interrupt()`: wake a blocked `deliver`/`pull` with `ServiceClosed`
    ///.
    pub fn interrupt(&self) {
        self.core.subscriptions.interrupt(self.session_id);
    }

    /// `probe()`: a liveness check with no further effect.
    pub fn probe(&self) -> bool {
        true
    }

    /// `pull(query, timeout_ms)`: poll the cursor for a
    /// PULL query, sleeping `pull.sleep` between empty probes, until either
    /// a non-empty response or the timeout elapses.
    pub async fn pull(&self, query: StoreValuesQuery, timeout_ms: u64) -> anyhow::Result<StoreValuesResponse> {
        if !self.core.capabilities.pull || self.core.pull_disabled {
            return Err(ErrorMetadata::service_not_available("pull is disabled").into());
        }
        let identity = self.identity();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let mut responder = self.core.backend.new_responder();
            let response = self
                .core
                .cursor
                .create_response(
                    query.clone(),
                    &identity,
                    self.core.authorizer.as_ref(),
                    self.core.polators.as_ref(),
                    responder.as_mut(),
                )
                .await;
            if !response.values.is_empty() || response.exception.is_some() || response.mark.is_some() {
                return Ok(response);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(response);
            }
            tokio::time::sleep(self.core.pull_sleep.min(deadline - now)).await;
        }
    }

    /// `purge(uuids, interval)`.
    pub async fn purge(&self, point_uuids: Vec<PointUuid>, interval: Interval) -> Vec<anyhow::Result<u64>> {
        if !self.core.capabilities.purge {
            return point_uuids
                .into_iter()
                .map(|_| Err(ErrorMetadata::service_not_available("purge is not supported").into()))
                .collect();
        }
        let identity = self.identity();
        let mut results = Vec::with_capacity(point_uuids.len());
        for point_uuid in point_uuids {
            results.push(self.purge_one(point_uuid, interval, &identity).await);
        }
        results
    }

    async fn purge_one(&self, point_uuid: PointUuid, interval: Interval, identity: &Identity) -> anyhow::Result<u64> {
        self.core
            .authorizer
            .check_point(identity, point_uuid, Permission::DELETE)?;
        let mut responder = self.core.backend.new_responder();
        self.core
            .archiver
            .purge(
                point_uuid,
                interval,
                responder.as_mut(),
                self.core.backend.writer(),
                self.core.notifier.as_ref(),
                self.core.replicator.as_ref(),
            )
            .await
    }

    /// `resolve(state, uuid?)`. `group_name` is looked up
    /// via whatever per-point `States` configuration the caller already
    /// resolved for `point_uuid`; the point lookup itself is the metadata
    /// loader's concern, so this takes the group name directly.
    pub fn resolve(&self, group_name: &str, state: StateValue) -> anyhow::Result<StateValue> {
        self.core.state_groups.resolve(group_name, &state)
    }

    /// `select(queries) → responses[]`.
    pub async fn select(&self, queries: Vec<StoreValuesQuery>) -> Vec<StoreValuesResponse> {
        let identity = self.identity();
        let mut responses = Vec::with_capacity(queries.len());
        for query in queries {
            let mut responder = self.core.backend.new_responder();
            let response = self
                .core
                .cursor
                .create_response(
                    query,
                    &identity,
                    self.core.authorizer.as_ref(),
                    self.core.polators.as_ref(),
                    responder.as_mut(),
                )
                .await;
            responses.push(response);
        }
        responses
    }

    /// `subscribe(uuids) → responses[]`: register each
    /// uuid and return its latest committed value (or empty) as a one-value
    /// response, preserving the wire contract's per-uuid
    /// response/exception slot.
    pub async fn subscribe(&self, point_uuids: Vec<PointUuid>) -> Vec<anyhow::Result<StoreValuesResponse>> {
        if !self.core.capabilities.subscribe {
            return point_uuids
                .into_iter()
                .map(|_| Err(ErrorMetadata::service_not_available("subscribe is not supported").into()))
                .collect();
        }
        let identity = self.identity();
        let mut outcomes: Vec<Option<anyhow::Result<StoreValuesResponse>>> = point_uuids.iter().map(|_| None).collect();
        let mut authorized = Vec::new();
        for (i, &uuid) in point_uuids.iter().enumerate() {
            match self.core.authorizer.check_point(&identity, uuid, Permission::READ) {
                Ok(()) => authorized.push((i, uuid)),
                Err(e) => outcomes[i] = Some(Err(e)),
            }
        }

        let mut latest = std::collections::HashMap::new();
        for &(_, uuid) in &authorized {
            let mut responder = self.core.backend.new_responder();
            let query = StoreValuesQueryBuilder::new()
                .point(QueryPoint::Uuid(uuid), false)
                .build()
                .expect("an unflagged single-point query always builds");
            let response = self
                .core
                .cursor
                .create_response(
                    query,
                    &identity,
                    self.core.authorizer.as_ref(),
                    self.core.polators.as_ref(),
                    responder.as_mut(),
                )
                .await;
            if let Some(v) = response.values.into_iter().next() {
                latest.insert(uuid, v);
            }
        }

        let authorized_uuids: Vec<PointUuid> = authorized.iter().map(|&(_, u)| u).collect();
        let results = self
            .core
            .subscriptions
            .subscribe(self.session_id, &authorized_uuids, |u| latest.get(&u).cloned());

        for ((i, _), result) in authorized.into_iter().zip(results) {
            outcomes[i] = Some(result.map(|maybe_v| match maybe_v {
                Some(v) => StoreValuesResponse {
                    values: vec![v],
                    ..Default::default()
                },
                None => StoreValuesResponse::default(),
            }));
        }

        outcomes.into_iter().map(|o| o.expect("every slot filled above")).collect()
    }

    /// `supportedValueTypeCodes()`.
    pub fn supported_value_type_codes(&self) -> &'static str {
        pvs_value::type_code::ALL
    }

    pub fn supports_count(&self) -> bool {
        self.core.capabilities.count
    }

    pub fn supports_delete(&self) -> bool {
        self.core.capabilities.delete
    }

    pub fn supports_deliver(&self) -> bool {
        self.core.capabilities.deliver
    }

    pub fn supports_pull(&self) -> bool {
        self.core.capabilities.pull && !self.core.pull_disabled
    }

    pub fn supports_purge(&self) -> bool {
        self.core.capabilities.purge
    }

    pub fn supports_subscribe(&self) -> bool {
        self.core.capabilities.subscribe
    }

    /// `unsubscribe(uuids) → exception[]`.
    pub fn unsubscribe(&self, point_uuids: Vec<PointUuid>) -> Vec<anyhow::Result<()>> {
        self.core.subscriptions.unsubscribe(self.session_id, &point_uuids)
    }

    /// `update(values) → exception[]`.
    pub async fn update(&self, updates: Vec<PendingUpdate>) -> Vec<anyhow::Result<()>> {
        let identity = self.identity();
        let metadata = self.core.metadata.clone();
        self.updater
            .update(
                updates,
                |uuid| metadata.point_metadata(uuid),
                &identity,
                self.core.authorizer.as_ref(),
                self.core.state_groups.as_ref(),
                self.core.backend.writer(),
                self.core.notifier.as_ref(),
                self.core.replicator.as_ref(),
            )
            .await
    }

    /// Run one archiver life-time sweep across every point the metadata
    /// store configures.
    pub async fn sweep(&self, now: i64) -> anyhow::Result<u64> {
        let configs = self.core.metadata.life_times();
        if configs.is_empty() {
            return Ok(0);
        }
        let mut responder = self.core.backend.new_responder();
        self.core
            .archiver
            .sweep(
                &configs,
                now,
                responder.as_mut(),
                self.core.backend.writer(),
                self.core.notifier.as_ref(),
                self.core.replicator.as_ref(),
            )
            .await
    }

    /// Drop every subscription owned by this session. The transport layer
    /// calls this on disconnect.
    pub fn close(&self) {
        self.core.subscriptions.close_session(self.session_id);
    }
}

/// Build the follow-up query for a `Mark` returned in a [`StoreValuesResponse`]
///. Exposed here
/// since `pvs-session` is where callers consume pagination marks; the logic
/// itself lives on `Mark` in `pvs-store`.
pub fn continue_from(mark: &Mark) -> StoreValuesQuery {
    mark.create_query()
}

#[cfg(test)]
mod tests {
    use pvs_auth::InMemoryAuthorizer;
    use pvs_backend_memory::MemoryBackend;
    use pvs_store::polator::Polator;
    use pvs_value::Value;

    use super::*;

    struct NoPolators;
    impl PolatorRegistry for NoPolators {
        fn polator_for(&self, _point_uuid: PointUuid) -> Option<Arc<dyn Polator>> {
            None
        }

        fn is_sync_capable(&self, _point_uuid: PointUuid) -> bool {
            false
        }
    }

    fn test_session() -> (Session, Arc<StoreCore>) {
        let backend = Arc::new(MemoryBackend::new());
        let core = Arc::new(StoreCore::new(
            backend,
            Arc::new(InMemoryAuthorizer::new()),
            Arc::new(NoPolators),
            Arc::new(EmptyMetadataStore),
            1000,
            0,
        ));
        wire_notifier_to_subscriptions(&core);
        let session = Session::new(core.clone(), 1, Identity::anonymous());
        (session, core)
    }

    #[tokio::test]
    async fn update_then_select_round_trips_the_value() {
        let (session, _core) = test_session();
        let uuid = PointUuid::new_v4();

        let results = session
            .update(vec![PendingUpdate {
                point_uuid: uuid,
                stamp: 100,
                state: None,
                value: Some(Value::Signed64(42)),
            }])
            .await;
        assert!(results[0].is_ok());

        let query = StoreValuesQueryBuilder::new()
            .point(QueryPoint::Uuid(uuid), false)
            .after(100)
            .before(101)
            .build()
            .unwrap();
        let responses = session.select(vec![query]).await;
        assert_eq!(responses[0].values.len(), 1);
        assert_eq!(responses[0].values[0].point_value.value, Some(Value::Signed64(42)));
    }

    #[tokio::test]
    async fn subscribe_returns_the_latest_value_then_deliver_sees_new_writes() {
        let (session, _core) = test_session();
        let uuid = PointUuid::new_v4();
        session
            .update(vec![PendingUpdate {
                point_uuid: uuid,
                stamp: 10,
                state: None,
                value: Some(Value::Signed64(1)),
            }])
            .await;

        let subscribed = session.subscribe(vec![uuid]).await;
        assert_eq!(subscribed.len(), 1);
        let snapshot = subscribed.into_iter().next().unwrap().unwrap();
        assert_eq!(snapshot.values[0].point_value.value, Some(Value::Signed64(1)));

        session
            .update(vec![PendingUpdate {
                point_uuid: uuid,
                stamp: 20,
                state: None,
                value: Some(Value::Signed64(2)),
            }])
            .await;

        let delivered = session.deliver(10, 500).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].point_value.value, Some(Value::Signed64(2)));
    }

    #[tokio::test]
    async fn interrupt_wakes_a_pending_deliver() {
        let (session, _core) = test_session();
        session.subscribe(vec![]).await;
        let session = Arc::new(session);
        let s2 = session.clone();
        let handle = tokio::spawn(async move { s2.deliver(10, 5_000).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.interrupt();
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn unauthorized_update_is_reported_but_does_not_abort_other_elements() {
        let auth = Arc::new(InMemoryAuthorizer::new());
        let core = Arc::new(StoreCore::new(
            Arc::new(MemoryBackend::new()),
            auth.clone(),
            Arc::new(NoPolators),
            Arc::new(EmptyMetadataStore),
            1000,
            0,
        ));
        wire_notifier_to_subscriptions(&core);
        let session = Session::new(core, 1, Identity::anonymous());

        let alice = Identity::new("alice");
        let injectable = PointUuid::new_v4();
        let restricted = PointUuid::new_v4();
        auth.grant_point(injectable, &alice, Permission::INJECT);
        auth.grant_point(restricted, &alice, Permission::READ);
        session.impersonate(Some("alice".to_string()));

        let results = session
            .update(vec![
                PendingUpdate {
                    point_uuid: injectable,
                    stamp: 1,
                    state: None,
                    value: Some(Value::Signed64(1)),
                },
                PendingUpdate {
                    point_uuid: restricted,
                    stamp: 2,
                    state: None,
                    value: Some(Value::Signed64(2)),
                },
            ])
            .await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn get_point_bindings_delegates_to_the_binding_index() {
        let (session, _core) = test_session();
        let server = PointUuid::new_v4();
        let client = PointUuid::new_v4();
        let results = session.get_point_bindings(vec![BindRequest {
            server_uuid: server,
            name: "temp.sensor.1".into(),
            client_uuid: client,
        }]);
        assert!(results[0].is_ok());
        assert_eq!(
            session.get_state_groups().len(),
            0
        );
    }

    #[test]
    fn supported_value_type_codes_matches_the_enumerated_union() {
        let (session, _core) = test_session();
        assert_eq!(session.supported_value_type_codes(), "BDLSYTHQGCXNV");
    }
}
