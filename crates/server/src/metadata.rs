//! A [`MetadataStore`] backed by [`pvs_config::ServerConfig`]'s `point[]`
//! table: the thin configuration-driven stand-in the scope note expects a
//! deployment to supply.
//! Points are looked up by their UUID's string form, matching how
//! `ServerConfig::point` is keyed -- name-based lookup would need the
//! binding index, left to a richer deployment.

use std::collections::HashMap;

use pvs_config::PointConfig;
use pvs_session::MetadataStore;
use pvs_store::{archiver::LifeTimeConfig, PointMetadata};
use pvs_value::PointUuid;

pub struct ConfigMetadataStore {
    points: HashMap<String, PointConfig>,
    store_null_removes: bool,
}

impl ConfigMetadataStore {
    pub fn new(points: HashMap<String, PointConfig>, store_null_removes: bool) -> Self {
        Self {
            points,
            store_null_removes,
        }
    }
}

impl MetadataStore for ConfigMetadataStore {
    fn point_metadata(&self, point_uuid: PointUuid) -> Option<PointMetadata> {
        let cfg = self.points.get(&point_uuid.undeleted().to_uuid().to_string())?;
        Some(PointMetadata {
            known: true,
            state_group: cfg.states.clone().unwrap_or_default(),
            has_input_relations: false,
            null_removes: cfg.null_removes.unwrap_or(self.store_null_removes),
        })
    }

    fn life_times(&self) -> Vec<LifeTimeConfig> {
        self.points
            .iter()
            .filter_map(|(key, cfg)| {
                let point_uuid = PointUuid::from_uuid(uuid::Uuid::parse_str(key).ok()?);
                let life_time = cfg.life_time_secs?;
                Some(LifeTimeConfig { point_uuid, life_time })
            })
            .collect()
    }
}
