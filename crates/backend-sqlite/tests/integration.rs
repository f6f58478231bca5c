use pvs_auth::{Identity, InMemoryAuthorizer};
use pvs_backend_sqlite::SqliteBackend;
use pvs_store::{
    query::{QueryFlags, QueryPoint, StoreValuesQueryBuilder},
    Cursor, Writer,
};
use pvs_value::{PointUuid, Value, VersionedValue};
use tempfile::TempDir;

struct NoPolators;

impl pvs_store::PolatorRegistry for NoPolators {
    fn polator_for(&self, _point_uuid: PointUuid) -> Option<std::sync::Arc<dyn pvs_store::Polator>> {
        None
    }

    fn is_sync_capable(&self, _point_uuid: PointUuid) -> bool {
        false
    }
}

#[tokio::test]
async fn write_then_select_survives_a_reopened_pool() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("integration.sqlite3").to_str().unwrap().to_string();
    let uuid = PointUuid::new_v4();

    {
        let backend = SqliteBackend::new(&path).unwrap();
        for stamp in [10, 20, 30] {
            backend
                .upsert(&VersionedValue::value(uuid, stamp, stamp, Value::Signed64(stamp)))
                .await
                .unwrap();
        }
        backend.commit().await.unwrap();
    }

    // Reopening against the same file proves rows survive a pool/process
    // boundary, unlike the in-memory backend.
    let backend = SqliteBackend::new(&path).unwrap();
    let mut responder = backend.responder();
    let cursor = Cursor::new(100, 0);
    let identity = Identity::anonymous();
    let authorizer = InMemoryAuthorizer::new();
    let polators = NoPolators;

    let query = StoreValuesQueryBuilder::new()
        .point(QueryPoint::Uuid(uuid), false)
        .after(0)
        .before(100)
        .flag(QueryFlags::MULTIPLE)
        .flag(QueryFlags::FORWARD)
        .build()
        .unwrap();

    let response = cursor
        .create_response(query, &identity, &authorizer, &polators, &mut responder)
        .await;

    assert_eq!(response.values.len(), 3);
    assert_eq!(response.values[0].stamp(), 10);
    assert_eq!(response.values[2].stamp(), 30);
}

#[tokio::test]
async fn delete_then_purge_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("purge.sqlite3").to_str().unwrap().to_string();
    let uuid = PointUuid::new_v4();
    let backend = SqliteBackend::new(&path).unwrap();

    backend
        .upsert(&VersionedValue::value(uuid, 100, 1, Value::Boolean(true)))
        .await
        .unwrap();
    let deleted = backend.delete(uuid, 100, false).await.unwrap();
    assert_eq!(deleted, 1);

    let removed = backend
        .purge(uuid, pvs_common::Interval::new(Some(0), Some(200)))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let mut responder = backend.responder();
    let query = StoreValuesQueryBuilder::new()
        .point(QueryPoint::Uuid(uuid), false)
        .after(0)
        .before(200)
        .flag(QueryFlags::MULTIPLE)
        .flag(QueryFlags::FORWARD)
        .flag(QueryFlags::DELETED)
        .build()
        .unwrap();
    let cursor = Cursor::new(100, 0);
    let identity = Identity::anonymous();
    let authorizer = InMemoryAuthorizer::new();
    let response = cursor
        .create_response(query, &identity, &authorizer, &NoPolators, &mut responder)
        .await;
    assert!(response.values.is_empty());
}
