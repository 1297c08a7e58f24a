use data_types::Endpoint;
use metric::{Attributes, DurationHistogram, Metric, Registry, U64Histogram};

/// Router observability surface. The metric names are part of the public
/// operator contract.
#[derive(Debug)]
pub(crate) struct RouterMetrics {
    pub(crate) refreshed_size: U64Histogram,
    pub(crate) cached_size: U64Histogram,
    pub(crate) gc_times: U64Histogram,
    pub(crate) gc_items: U64Histogram,
    pub(crate) gc_timer: DurationHistogram,
}

impl RouterMetrics {
    pub(crate) fn new(registry: &Registry, cluster: &Endpoint) -> Self {
        let attributes = Attributes::from([("cluster", cluster.to_string())]);

        let refreshed_size: Metric<U64Histogram> = registry.register_metric(
            "route_for_tables_refreshed_size",
            "number of routes returned by each refresh RPC",
        );
        let cached_size: Metric<U64Histogram> = registry.register_metric(
            "route_for_tables_cached_size",
            "route cache size observed after each refresh",
        );
        let gc_times: Metric<U64Histogram> = registry.register_metric(
            "route_for_tables_gc_times",
            "consecutive eviction rounds per GC invocation",
        );
        let gc_items: Metric<U64Histogram> = registry.register_metric(
            "route_for_tables_gc_items",
            "entries evicted per GC round",
        );
        let gc_timer: Metric<DurationHistogram> = registry.register_metric(
            "route_for_tables_gc_timer",
            "wall-clock duration of GC invocations",
        );

        Self {
            refreshed_size: refreshed_size.recorder(attributes.clone()),
            cached_size: cached_size.recorder(attributes.clone()),
            gc_times: gc_times.recorder(attributes.clone()),
            gc_items: gc_items.recorder(attributes.clone()),
            gc_timer: gc_timer.recorder(attributes),
        }
    }
}
