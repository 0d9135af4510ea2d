use crate::context::StoreContext;
use crate::lease::Holder;
use crate::pool::{Machine, Pool};
use crate::store::FsLockStore;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub(crate) const FLOW: &str = "nightly";

/// A store rooted in a fresh temporary directory.
pub(crate) fn create_test_store() -> (TempDir, FsLockStore) {
    let temp_dir = TempDir::new().unwrap();
    let ctx = StoreContext::resolve(temp_dir.path()).unwrap();
    let store = FsLockStore::open(ctx, chrono::Duration::seconds(60)).unwrap();
    (temp_dir, store)
}

/// A pool of `FLOW` machines with the given ids.
pub(crate) fn pool_of(ids: &[&str]) -> Pool {
    Pool::from_machines(
        ids.iter()
            .map(|id| Machine::new(id, FLOW.to_string(), None).unwrap()),
    )
    .unwrap()
}

pub(crate) fn holder(pipeline_id: &str, job_id: &str) -> Holder {
    Holder::new(pipeline_id, Some(job_id)).unwrap()
}

/// Write a pool file listing `ids` as enabled `FLOW` machines.
pub(crate) fn write_pool_file(dir: &Path, ids: &[&str]) -> PathBuf {
    let mut entries = serde_json::Map::new();
    entries.insert(
        crate::pool::COMMENT_FIELD_NAME.to_string(),
        serde_json::json!("test machines"),
    );
    for id in ids {
        entries.insert(
            id.to_string(),
            serde_json::json!({ "enabled": true, "flow_type": FLOW, "server_type": "XSIAM" }),
        );
    }

    let path = dir.join("cloud_servers.json");
    std::fs::write(&path, serde_json::Value::Object(entries).to_string()).unwrap();
    path
}
