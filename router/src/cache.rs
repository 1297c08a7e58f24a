use crate::Route;
use data_types::Endpoint;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// The in-memory routing table: a table-keyed map behind a read-write
/// mutex. Reads are concurrent; refresh/eviction writes are last-writer-wins.
#[derive(Debug, Default)]
pub struct RouteCache {
    routes: RwLock<HashMap<String, Arc<Route>>>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str) -> Option<Arc<Route>> {
        self.routes.read().get(table).map(Arc::clone)
    }

    /// Insert routes, overwriting existing entries for the same tables.
    pub fn insert_all(&self, routes: impl IntoIterator<Item = Arc<Route>>) {
        let mut guard = self.routes.write();
        for route in routes {
            guard.insert(route.table().to_owned(), route);
        }
    }

    pub fn remove_tables<T: AsRef<str>>(&self, tables: impl IntoIterator<Item = T>) {
        let mut guard = self.routes.write();
        for table in tables {
            guard.remove(table.as_ref());
        }
    }

    /// Drop everything, returning the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut guard = self.routes.write();
        let size = guard.len();
        guard.clear();
        size
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// The distinct endpoints currently cached, used as reserve addresses
    /// when the cluster endpoint is unreachable.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let guard = self.routes.read();
        let mut endpoints: Vec<_> = guard
            .values()
            .map(|route| route.endpoint().clone())
            .collect();
        endpoints.sort_unstable();
        endpoints.dedup();
        endpoints
    }

    /// Evict the `k` entries with the smallest last-hit stamp (ties broken
    /// arbitrarily), returning how many were removed.
    pub fn evict_oldest(&self, k: usize) -> usize {
        if k == 0 {
            return 0;
        }

        let mut entries: Vec<(String, i64)> = {
            let guard = self.routes.read();
            guard
                .iter()
                .map(|(table, route)| (table.clone(), route.last_hit()))
                .collect()
        };
        if entries.is_empty() {
            return 0;
        }

        let k = k.min(entries.len());
        entries.select_nth_unstable_by_key(k - 1, |(_, last_hit)| *last_hit);
        entries.truncate(k);

        let mut guard = self.routes.write();
        let mut removed = 0;
        for (table, _) in entries {
            if guard.remove(&table).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(table: &str, port: u16, last_hit: i64) -> Arc<Route> {
        Arc::new(Route::new(table, Endpoint::new("10.0.0.1", port), last_hit))
    }

    #[test]
    fn insert_overwrites_and_get_shares() {
        let cache = RouteCache::new();
        cache.insert_all([route("t", 1, 10)]);
        cache.insert_all([route("t", 2, 20)]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("t").unwrap().endpoint().port, 2);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn endpoints_are_distinct() {
        let cache = RouteCache::new();
        cache.insert_all([route("a", 1, 0), route("b", 1, 0), route("c", 2, 0)]);
        assert_eq!(cache.endpoints().len(), 2);
    }

    #[test]
    fn evicts_least_recently_hit_first() {
        let cache = RouteCache::new();
        cache.insert_all((0..10).map(|i| route(&format!("t{i}"), 1, i as i64)));

        assert_eq!(cache.evict_oldest(3), 3);
        assert_eq!(cache.len(), 7);
        for i in 0..3 {
            assert!(cache.get(&format!("t{i}")).is_none(), "t{i} should be gone");
        }
        for i in 3..10 {
            assert!(cache.get(&format!("t{i}")).is_some(), "t{i} should remain");
        }
    }

    #[test]
    fn evict_handles_oversized_k() {
        let cache = RouteCache::new();
        cache.insert_all([route("a", 1, 0)]);
        assert_eq!(cache.evict_oldest(100), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.evict_oldest(1), 0);
    }
}
