//! A demo point-value store server: accepts TCP connections speaking the
//! newline-delimited JSON protocol defined in [`wire`]/[`request`] and wires
//! each one to a [`pvs_session::Session`] against a shared [`StoreCore`].
//!
//! This binary only demonstrates wiring a session to a backend and driving
//! it from a trivial local listener -- the transport itself is explicitly
//! out of the core's scope; the interesting logic all lives in
//! `pvs-store`/`pvs-session`.

mod args;
mod connection;
mod metadata;
mod request;
mod wire;

use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use pvs_auth::{Identity, InMemoryAuthorizer};
use pvs_config::ServerConfig;
use pvs_runtime::{prod::ProdRuntime, Runtime};
use pvs_session::{wire_notifier_to_subscriptions, Session, StoreCore};
use pvs_store::{polator::PolatorRegistry, Backend};
use pvs_value::PointUuid;
use tokio::net::TcpListener;

use crate::args::Args;

struct NoPolators;

impl PolatorRegistry for NoPolators {
    fn polator_for(&self, _point_uuid: PointUuid) -> Option<Arc<dyn pvs_store::polator::Polator>> {
        None
    }

    fn is_sync_capable(&self, _point_uuid: PointUuid) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _tracing_guard = pvs_cmd_util::env::config_service();

    let config = match &args.config {
        Some(path) => ServerConfig::parse(
            &tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("couldn't read config file {path:?}"))?,
        )
        .with_context(|| format!("couldn't parse config file {path:?}"))?,
        None => ServerConfig::default(),
    };

    let backend: Arc<dyn Backend> = match &args.db_path {
        Some(path) => {
            let path = path.to_str().context("db path is not valid utf-8")?;
            Arc::new(
                pvs_backend_sqlite::SqliteBackend::new(path).context("opening sqlite backend")?,
            )
        },
        None => Arc::new(pvs_backend_memory::MemoryBackend::new()),
    };

    let metadata = Arc::new(metadata::ConfigMetadataStore::new(
        config.point.clone(),
        config.null_removes,
    ));

    let mut core = StoreCore::new(
        backend,
        Arc::new(InMemoryAuthorizer::new()),
        Arc::new(NoPolators),
        metadata.clone(),
        config.response_limit as i32,
        config.backend_limit,
    );
    core.store_null_removes = config.null_removes;
    core.drop_deleted = config.drop_deleted;
    core.pull_disabled = config.pull_disabled;
    core.pull_sleep = std::time::Duration::from_secs(config.pull_sleep_secs);
    core.state_groups.reload(config.state.clone());
    for listener_config in &config.updates_listener {
        tracing::info!(class = ?listener_config.class, batch_limit = listener_config.batch_limit, "updates.listener configured (metadata-loader-supplied implementations are out of this binary's demo scope)");
    }

    let core = Arc::new(core);
    wire_notifier_to_subscriptions(&core);

    if let Some(config_path) = args.config.clone() {
        let rt = ProdRuntime::new(tokio::runtime::Handle::current());
        let loader = pvs_config::ConfigLoader::new(rt, config_path)
            .await
            .context("starting config loader")?;
        let core = core.clone();
        tokio::spawn(async move {
            let mut changes = loader.subscribe();
            while let Some(config) = changes.next().await {
                tracing::info!("applying reloaded configuration");
                core.state_groups.reload(config.state.clone());
            }
            // loader is dropped here if the stream ends; kept alive by the
            // move closure for as long as this task runs.
            drop(loader);
        });
    }

    {
        let core = core.clone();
        tokio::spawn(async move {
            let sweep_session = Session::new(core.clone(), 0, Identity::anonymous());
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now = ProdRuntime::new(tokio::runtime::Handle::current())
                    .unix_timestamp()
                    .as_secs_f64() as i64;
                if let Err(e) = sweep_session.sweep(now).await {
                    pvs_common::report_error(&e);
                }
            }
        });
    }

    let addr = std::net::SocketAddr::new(args.interface, args.port);
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, "pvs-server listening");

    let next_session_id = Arc::new(AtomicU64::new(1));
    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        let session_id = next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(core.clone(), session_id, Identity::anonymous()));
        tokio::spawn(async move {
            tracing::info!(%peer, session_id, "connection accepted");
            if let Err(e) = connection::handle_connection(stream, session).await {
                tracing::warn!(%peer, session_id, error = %e, "connection ended with an error");
            }
        });
    }
}
