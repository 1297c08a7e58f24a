//! The process-wide registry of live client instances.
//!
//! Clients register on build and deregister on shutdown (or drop), so
//! operators can enumerate what a process has open. Module-wide state with
//! explicit deregistration keeps the count correct across repeated
//! build/shutdown cycles.

use data_types::Endpoint;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// A live client instance, as reported by [`crate::Client::instances`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Process-unique instance id.
    pub id: u64,
    /// The cluster address the instance was built against.
    pub cluster_address: Endpoint,
    /// The default database of the instance.
    pub database: String,
}

static INSTANCES: OnceLock<Mutex<BTreeMap<u64, InstanceInfo>>> = OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn instances_lock() -> &'static Mutex<BTreeMap<u64, InstanceInfo>> {
    INSTANCES.get_or_init(Default::default)
}

pub(crate) fn register(cluster_address: Endpoint, database: String) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    instances_lock().lock().insert(
        id,
        InstanceInfo {
            id,
            cluster_address,
            database,
        },
    );
    id
}

pub(crate) fn deregister(id: u64) {
    instances_lock().lock().remove(&id);
}

pub(crate) fn instances() -> Vec<InstanceInfo> {
    instances_lock().lock().values().cloned().collect()
}
