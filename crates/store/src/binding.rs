use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use pvs_errors::ErrorMetadata;
use pvs_value::PointUuid;

/// `{name, client_uuid, server_uuid}`. The
/// server UUID is the stable internal identity; the client UUID and name
/// are what callers address the point by and can be rebound.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PointBinding {
    pub name: String,
    pub client_uuid: PointUuid,
    pub server_uuid: PointUuid,
}

/// One binding request: associates a new name/UUID with an existing server
/// UUID.
#[derive(Clone, Debug)]
pub struct BindRequest {
    pub server_uuid: PointUuid,
    pub name: String,
    pub client_uuid: PointUuid,
}

/// Selector for looking a binding up by one of its three addressable forms:
/// by exact name, by compiled name pattern, or by UUID.
pub enum Selector<'a> {
    Name(&'a str),
    /// A pre-compiled glob-ish pattern matcher; kept abstract since the
    /// pattern language itself is a transport/metadata-loader concern.
    NamePattern(&'a dyn Fn(&str) -> bool),
    ClientUuid(PointUuid),
    ServerUuid(PointUuid),
}

/// Name/UUID/server-UUID bindings and name-pattern selection.
///
/// Ordering invariant: bindings order first by server UUID
/// bytes, then client UUID bytes -- the `by_server` index below is exactly
/// that order, used for range iteration.
#[derive(Default)]
pub struct PointBindingIndex {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, PointUuid>,
    by_server: BTreeMap<(PointUuid, PointUuid), PointBinding>,
    by_client: HashMap<PointUuid, PointUuid>,
}

impl PointBindingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, selector: Selector<'_>) -> Vec<PointBinding> {
        let inner = self.inner.read();
        match selector {
            Selector::Name(name) => inner
                .by_name
                .get(name)
                .and_then(|server_uuid| Self::binding_for_server(&inner, *server_uuid))
                .into_iter()
                .collect(),
            Selector::ClientUuid(client_uuid) => inner
                .by_client
                .get(&client_uuid)
                .and_then(|server_uuid| Self::binding_for_server(&inner, *server_uuid))
                .into_iter()
                .collect(),
            Selector::ServerUuid(server_uuid) => {
                Self::binding_for_server(&inner, server_uuid).into_iter().collect()
            },
            Selector::NamePattern(matches) => inner
                .by_name
                .iter()
                .filter(|(name, _)| matches(name))
                .filter_map(|(_, server_uuid)| Self::binding_for_server(&inner, *server_uuid))
                .collect(),
        }
    }

    fn binding_for_server(inner: &Inner, server_uuid: PointUuid) -> Option<PointBinding> {
        inner
            .by_server
            .range((server_uuid, PointUuid::from_bytes([0; 16]))..)
            .find(|((s, _), _)| *s == server_uuid)
            .map(|(_, binding)| binding.clone())
    }

    /// Apply binding requests, replacing any existing name/client-uuid
    /// mapping for the same server UUID atomically.
    pub fn bind(&self, requests: Vec<BindRequest>) -> Vec<anyhow::Result<PointBinding>> {
        let mut inner = self.inner.write();
        requests
            .into_iter()
            .map(|req| {
                let binding = PointBinding {
                    name: req.name.clone(),
                    client_uuid: req.client_uuid,
                    server_uuid: req.server_uuid,
                };
                if let Some(old_client) = inner.by_name.get(&req.name).copied() {
                    inner.by_client.remove(&old_client);
                }
                inner.by_name.insert(req.name.clone(), req.server_uuid);
                inner.by_client.insert(req.client_uuid, req.server_uuid);
                inner
                    .by_server
                    .insert((req.server_uuid, req.client_uuid), binding.clone());
                Ok(binding)
            })
            .collect()
    }

    /// Remove a binding by name. Returns `true` only when no other name
    /// remains bound to the same server UUID.
    pub fn remove(&self, name: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write();
        let Some(server_uuid) = inner.by_name.remove(name) else {
            return Err(ErrorMetadata::point_unknown(format!("no binding named {name}")).into());
        };
        let still_bound = inner.by_name.values().any(|s| *s == server_uuid);
        if !still_bound {
            let keys_to_drop: Vec<_> = inner
                .by_server
                .range((server_uuid, PointUuid::from_bytes([0; 16]))..)
                .take_while(|((s, _), _)| *s == server_uuid)
                .map(|(k, _)| *k)
                .collect();
            for key in keys_to_drop {
                if let Some(binding) = inner.by_server.remove(&key) {
                    inner.by_client.remove(&binding.client_uuid);
                }
            }
        }
        Ok(!still_bound)
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_server.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid() -> PointUuid {
        PointUuid::new_v4()
    }

    #[test]
    fn bind_then_lookup_by_each_form() {
        let idx = PointBindingIndex::new();
        let server = uuid();
        let client = uuid();
        idx.bind(vec![BindRequest {
            server_uuid: server,
            name: "temp.sensor.1".into(),
            client_uuid: client,
        }]);

        assert_eq!(idx.lookup(Selector::Name("temp.sensor.1")).len(), 1);
        assert_eq!(idx.lookup(Selector::ClientUuid(client)).len(), 1);
        assert_eq!(idx.lookup(Selector::ServerUuid(server)).len(), 1);
    }

    #[test]
    fn rebind_replaces_atomically() {
        let idx = PointBindingIndex::new();
        let server = uuid();
        let client_a = uuid();
        let client_b = uuid();
        idx.bind(vec![BindRequest {
            server_uuid: server,
            name: "p".into(),
            client_uuid: client_a,
        }]);
        idx.bind(vec![BindRequest {
            server_uuid: server,
            name: "p".into(),
            client_uuid: client_b,
        }]);

        assert!(idx.lookup(Selector::ClientUuid(client_a)).is_empty());
        assert_eq!(idx.lookup(Selector::ClientUuid(client_b)).len(), 1);
    }

    #[test]
    fn remove_returns_true_only_when_last_name_for_server() {
        let idx = PointBindingIndex::new();
        let server = uuid();
        idx.bind(vec![
            BindRequest {
                server_uuid: server,
                name: "alias.a".into(),
                client_uuid: uuid(),
            },
            BindRequest {
                server_uuid: server,
                name: "alias.b".into(),
                client_uuid: uuid(),
            },
        ]);

        assert!(!idx.remove("alias.a").unwrap());
        assert!(idx.remove("alias.b").unwrap());
    }

    #[test]
    fn name_pattern_selection() {
        let idx = PointBindingIndex::new();
        idx.bind(vec![
            BindRequest {
                server_uuid: uuid(),
                name: "temp.a".into(),
                client_uuid: uuid(),
            },
            BindRequest {
                server_uuid: uuid(),
                name: "pressure.a".into(),
                client_uuid: uuid(),
            },
        ]);
        let matches = idx.lookup(Selector::NamePattern(&|n| n.starts_with("temp.")));
        assert_eq!(matches.len(), 1);
    }
}
