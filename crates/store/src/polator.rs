use pvs_value::PointUuid;

use crate::query::{StoreValuesQuery, StoreValuesResponse};

/// Interpolation/extrapolation strategy, keyed per point. The cursor
/// delegates a polated, non-counting query entirely to whatever
/// implementation is configured for the point; the actual numerics are an
/// external collaborator this crate never implements.
#[async_trait::async_trait]
pub trait Polator: Send + Sync {
    async fn polate(
        &self,
        point_uuid: PointUuid,
        query: &StoreValuesQuery,
    ) -> anyhow::Result<StoreValuesResponse>;
}

/// Resolves which `Polator` (if any) applies to a point, matching the
/// per-point `Polator`/`PolatorTimeLimit` configuration parameters.
pub trait PolatorRegistry: Send + Sync {
    fn polator_for(&self, point_uuid: PointUuid) -> Option<std::sync::Arc<dyn Polator>>;

    fn is_sync_capable(&self, point_uuid: PointUuid) -> bool;
}
