//! Loads the store's TOML configuration file and reloads it on `SIGHUP`,
//! using a signal handler plus a `tokio::sync::watch` channel to publish
//! each reload to subscribers.

use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;
use futures::{Stream, StreamExt};
use pvs_common::report_error;
use pvs_runtime::{Runtime, SpawnHandle};
use pvs_value::StateGroup;
use serde::Deserialize;
use tokio::{signal::unix::SignalKind, sync::watch};
use tokio_stream::wrappers::{ReceiverStream, SignalStream, WatchStream};

fn default_response_limit() -> u32 {
    1000
}

fn default_pull_sleep_secs() -> u64 {
    60
}

fn default_statements() -> u32 {
    10
}

fn default_responder_keep_secs() -> u32 {
    300
}

/// One `updates.listener[]` entry.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct UpdatesListenerConfig {
    pub class: Option<String>,
    #[serde(rename = "batch.limit", default = "default_response_limit")]
    pub batch_limit: u32,
}

impl Default for UpdatesListenerConfig {
    fn default() -> Self {
        Self {
            class: None,
            batch_limit: default_response_limit(),
        }
    }
}

/// One `replicator.partner[]` entry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReplicatorPartnerConfig {
    #[serde(rename = "store.name")]
    pub store_name: String,
    pub queue: String,
}

/// Per-point parameters.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PointConfig {
    pub notify: bool,
    pub replicated: bool,
    pub replicates: Vec<String>,
    pub states: Option<String>,
    pub polator: Option<String>,
    #[serde(rename = "polatorTimeLimit")]
    pub polator_time_limit_secs: Option<u64>,
    #[serde(rename = "archiveTime")]
    pub archive_time_secs: Option<i64>,
    #[serde(rename = "lifeTime")]
    pub life_time_secs: Option<i64>,
    #[serde(rename = "nullRemoves")]
    pub null_removes: Option<bool>,
    pub tag: Option<String>,
}

/// The full recognized configuration surface.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "response.limit", default = "default_response_limit")]
    pub response_limit: u32,
    #[serde(rename = "backend.limit")]
    pub backend_limit: u32,
    #[serde(rename = "pull.sleep", default = "default_pull_sleep_secs")]
    pub pull_sleep_secs: u64,
    #[serde(rename = "pull.disabled")]
    pub pull_disabled: bool,
    #[serde(rename = "notices.filtered")]
    pub notices_filtered: bool,
    #[serde(rename = "null.removes")]
    pub null_removes: bool,
    #[serde(rename = "drop.deleted")]
    pub drop_deleted: bool,
    pub snapshot: Option<String>,
    #[serde(rename = "polator.class")]
    pub polator_class: Option<String>,
    #[serde(rename = "notifier.class")]
    pub notifier_class: Option<String>,
    #[serde(rename = "replicator.class")]
    pub replicator_class: Option<String>,
    #[serde(rename = "back.end.class")]
    pub back_end_class: Option<String>,
    #[serde(rename = "data.dir")]
    pub data_dir: Option<PathBuf>,
    /// Group-reference names; the groups themselves are resolved from
    /// `state`.
    pub states: Vec<String>,
    pub state: Vec<StateGroup>,
    #[serde(rename = "updates.listener")]
    pub updates_listener: Vec<UpdatesListenerConfig>,
    #[serde(rename = "replicator.partner")]
    pub replicator_partner: Vec<ReplicatorPartnerConfig>,
    #[serde(rename = "replicated.defaults")]
    pub replicated_defaults: Option<String>,
    #[serde(rename = "replicate.converts")]
    pub replicate_converts: bool,
    #[serde(rename = "responder.keep", default = "default_responder_keep_secs")]
    pub responder_keep_secs: u32,
    #[serde(default = "default_statements")]
    pub statements: u32,
    #[serde(rename = "sql.create")]
    pub sql_create: Option<String>,
    /// Per-point parameters, keyed by point name or UUID string.
    pub point: HashMap<String, PointConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            response_limit: default_response_limit(),
            backend_limit: 0,
            pull_sleep_secs: default_pull_sleep_secs(),
            pull_disabled: false,
            notices_filtered: false,
            null_removes: false,
            drop_deleted: false,
            snapshot: None,
            polator_class: None,
            notifier_class: None,
            replicator_class: None,
            back_end_class: None,
            data_dir: None,
            states: Vec::new(),
            state: Vec::new(),
            updates_listener: Vec::new(),
            replicator_partner: Vec::new(),
            replicated_defaults: None,
            replicate_converts: false,
            responder_keep_secs: default_responder_keep_secs(),
            statements: default_statements(),
            sql_create: None,
            point: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Loads a [`ServerConfig`] from disk on creation and again every time the
/// process receives `SIGHUP`, or when [`ConfigLoader::reload`] is called
/// manually. Multiple subscribers can share one loader; decoding only
/// happens once per update.
pub struct ConfigLoader {
    config_rx: watch::Receiver<ServerConfig>,
    reload_tx: tokio::sync::mpsc::Sender<()>,
    handle: Box<dyn SpawnHandle>,
}

impl ConfigLoader {
    pub async fn new<RT: Runtime>(rt: RT, config_path: PathBuf) -> anyhow::Result<Self> {
        // Set up the signal handler before the first read so a SIGHUP that
        // arrives during startup is never silently dropped.
        let signal_fut = tokio::signal::unix::signal(SignalKind::hangup())
            .context("couldn't install SIGHUP handler")?;
        let initial = ServerConfig::parse(
            &tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("couldn't read config file {config_path:?}"))?,
        )
        .with_context(|| format!("couldn't parse config file {config_path:?}"))?;
        let (config_tx, config_rx) = watch::channel(initial);
        let (reload_tx, reload_rx) = tokio::sync::mpsc::channel(1);

        let handle = rt.spawn("config_loader", {
            let config_path = config_path.clone();
            async move {
                tracing::info!(?config_path, "watching config file for SIGHUP-triggered reload");
                let mut stream =
                    futures::stream::select(SignalStream::new(signal_fut), ReceiverStream::new(reload_rx));
                loop {
                    let () = stream.select_next_some().await;
                    match tokio::fs::read_to_string(&config_path)
                        .await
                        .map_err(anyhow::Error::from)
                        .and_then(|s| ServerConfig::parse(&s))
                        .with_context(|| format!("failed to reload config from {config_path:?}"))
                    {
                        Ok(config) => {
                            tracing::info!(?config_path, "reloading config");
                            config_tx.send_if_modified(|old| {
                                if old != &config {
                                    *old = config;
                                    true
                                } else {
                                    false
                                }
                            });
                        },
                        Err(e) => {
                            report_error(&e);
                            continue;
                        },
                    }
                }
            }
        });

        Ok(ConfigLoader {
            config_rx,
            reload_tx,
            handle,
        })
    }

    /// A stream of configs that only emits when a reload actually changes
    /// the decoded value. Initially blocked; call [`ConfigLoader::get_config`]
    /// for the current value.
    pub fn subscribe(&self) -> impl Stream<Item = ServerConfig> + Unpin {
        let mut rx = self.config_rx.clone();
        rx.mark_unchanged();
        WatchStream::from_changes(rx)
    }

    pub fn get_config(&self) -> ServerConfig {
        self.config_rx.borrow().clone()
    }

    /// Triggers a reload without waiting for a signal; used by tests and by
    /// operators wiring up their own reload mechanism (e.g. an admin RPC).
    pub fn reload(&self) {
        let _ = self.reload_tx.try_send(());
    }
}

impl Drop for ConfigLoader {
    fn drop(&mut self) {
        self.handle.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use futures::FutureExt;
    use pvs_runtime::prod::ProdRuntime;

    use super::*;

    #[test]
    fn parses_recognized_keys_with_documented_defaults() {
        let config = ServerConfig::parse(
            r#"
            "response.limit" = 500
            "pull.disabled" = true
            "data.dir" = "/var/lib/pvs"

            [point.furnace_temp]
            notify = true
            lifeTime = 86400
            "#,
        )
        .unwrap();
        assert_eq!(config.response_limit, 500);
        assert_eq!(config.pull_sleep_secs, 60);
        assert!(config.pull_disabled);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/pvs")));
        let point = &config.point["furnace_temp"];
        assert!(point.notify);
        assert_eq!(point.life_time_secs, Some(86400));
    }

    #[test]
    fn an_empty_document_is_entirely_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[tokio::test]
    async fn reload_picks_up_a_changed_file_and_skips_unchanged_ones() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#""response.limit" = 100"#).unwrap();

        let rt = ProdRuntime::new(tokio::runtime::Handle::current());
        let loader = ConfigLoader::new(rt, file.path().to_owned()).await.unwrap();
        assert_eq!(loader.get_config().response_limit, 100);

        let mut subscription = loader.subscribe().fuse();
        assert!(subscription.next().now_or_never().is_none());

        // Reloading without changing the file must not emit anything.
        loader.reload();
        tokio::task::yield_now().await;
        assert!(subscription.next().now_or_never().is_none());

        use std::io::{Seek, SeekFrom};
        file.as_file().set_len(0).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        write!(file, r#""response.limit" = 200"#).unwrap();
        loader.reload();

        let next = subscription.select_next_some().await;
        assert_eq!(next.response_limit, 200);
        assert_eq!(loader.get_config().response_limit, 200);
    }
}
