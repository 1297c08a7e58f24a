use data_types::Endpoint;
use std::sync::atomic::{AtomicI64, Ordering};

/// A table→endpoint mapping with a recency stamp.
#[derive(Debug)]
pub struct Route {
    table: String,
    endpoint: Endpoint,
    /// Millisecond tick of the last cache hit.
    last_hit: AtomicI64,
}

impl Route {
    pub fn new(table: impl Into<String>, endpoint: Endpoint, now_ms: i64) -> Self {
        Self {
            table: table.into(),
            endpoint,
            last_hit: AtomicI64::new(now_ms),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn last_hit(&self) -> i64 {
        self.last_hit.load(Ordering::Acquire)
    }

    /// Weak recency update: a single compare-and-set attempt, dropped on
    /// contention. Eviction only needs approximate recency ordering.
    pub fn touch(&self, now_ms: i64) {
        let prev = self.last_hit.load(Ordering::Relaxed);
        if now_ms > prev {
            let _ = self.last_hit.compare_exchange(
                prev,
                now_ms,
                Ordering::Release,
                Ordering::Relaxed,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_only_moves_forward() {
        let route = Route::new("t", Endpoint::new("10.0.0.1", 8831), 100);
        assert_eq!(route.last_hit(), 100);

        route.touch(200);
        assert_eq!(route.last_hit(), 200);

        // A stale tick never rewinds the stamp.
        route.touch(150);
        assert_eq!(route.last_hit(), 200);
    }
}
