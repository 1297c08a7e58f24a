//! Metric abstraction for the TesseraDB client.
//!
//! A small registry decoupling metric recording from metric export:
//!
//! - [`Registry`] stores [`Instrument`]s by name and reports them in
//!   alphabetical order.
//! - [`Metric<T>`] maintains one recorder per distinct [`Attributes`] set.
//! - [`RawReporter`] buffers [`Observation`]s and backs test assertions;
//!   exporters for external sinks plug in through the same [`Reporter`]
//!   trait.
//!
//! Metric names are `&'static str` on purpose: they appear in-the-plain and
//! can be grepped for, and several of them (the `route_for_tables_*` family)
//! are part of the public operator contract.
//!
//! ```
//! use metric::{Registry, Metric, U64Counter, RawReporter, Observation, Attributes};
//!
//! let registry = Registry::new();
//! let requests: Metric<U64Counter> = registry.register_metric("requests", "request count");
//! requests.recorder(&[("endpoint", "127.0.0.1:8831")]).inc(2);
//!
//! let mut reporter = RawReporter::default();
//! registry.report(&mut reporter);
//! let set = &reporter.observations()[0];
//! assert_eq!(set.metric_name, "requests");
//! assert_eq!(set.observations[0].1, Observation::U64Counter(2));
//! ```

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A `Registry` stores a map of metric names to [`Instrument`]s.
#[derive(Debug, Default)]
pub struct Registry {
    /// Instruments by metric name. A `BTreeMap` gives reports a consistent
    /// ordering.
    instruments: Mutex<BTreeMap<&'static str, Box<dyn Instrument>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new [`Metric`] with the provided name and description, or
    /// return the already-registered instance.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered with a different instrument
    /// type.
    pub fn register_metric<T>(&self, name: &'static str, description: &'static str) -> Metric<T>
    where
        T: MetricObserver + Default,
    {
        let mut instruments = self.instruments.lock();
        match instruments.entry(name) {
            Entry::Vacant(v) => {
                let metric = Metric::<T>::new(name, description);
                v.insert(Box::new(metric.clone()));
                metric
            }
            Entry::Occupied(o) => o
                .get()
                .as_any()
                .downcast_ref::<Metric<T>>()
                .unwrap_or_else(|| panic!("metric \"{name}\" registered with different type"))
                .clone(),
        }
    }

    /// Write all registered instruments to `reporter`.
    pub fn report(&self, reporter: &mut dyn Reporter) {
        for instrument in self.instruments.lock().values() {
            instrument.report(reporter);
        }
    }
}

/// An object that can write its observations to a [`Reporter`].
pub trait Instrument: std::fmt::Debug + Send + Sync {
    fn report(&self, reporter: &mut dyn Reporter);

    fn as_any(&self) -> &dyn Any;
}

/// A sink for [`Observation`]s.
pub trait Reporter {
    fn start_metric(&mut self, metric_name: &'static str, description: &'static str);

    fn report_observation(&mut self, attributes: &Attributes, observation: Observation);

    fn finish_metric(&mut self);
}

/// A single recorded metric value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    U64Counter(u64),
    U64Gauge(u64),
    U64Histogram(HistogramObservation<u64>),
    DurationHistogram(HistogramObservation<Duration>),
}

/// Bucketed histogram data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramObservation<T> {
    /// The sum of all observed values.
    pub total: T,
    /// (inclusive upper bound, count) pairs.
    pub buckets: Vec<(T, u64)>,
    /// The number of observations.
    pub sample_count: u64,
}

/// A set of key-value pairs distinguishing recorders of the same metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Attributes(BTreeMap<&'static str, Cow<'static, str>>);

impl Attributes {
    pub fn iter(&self) -> impl Iterator<Item = (&&'static str, &Cow<'static, str>)> {
        self.0.iter()
    }
}

impl<const N: usize> From<&[(&'static str, &'static str); N]> for Attributes {
    fn from(pairs: &[(&'static str, &'static str); N]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (*k, Cow::Borrowed(*v)))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&'static str, String); N]> for Attributes {
    fn from(pairs: [(&'static str, String); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k, Cow::Owned(v)))
                .collect(),
        )
    }
}

/// An object that reports a single [`Observation`].
pub trait MetricObserver: std::fmt::Debug + Send + Sync + 'static {
    fn observe(&self) -> Observation;
}

/// A named instrument maintaining one `T` recorder per [`Attributes`] set.
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    description: &'static str,
    shard: Arc<Mutex<BTreeMap<Attributes, T>>>,
}

// Not derived: `T: Clone` must not be required.
impl<T> Clone for Metric<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            description: self.description,
            shard: Arc::clone(&self.shard),
        }
    }
}

impl<T> Metric<T>
where
    T: MetricObserver + Default,
{
    fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            shard: Default::default(),
        }
    }

    /// Return the recorder for the given attributes, creating it on first use.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T
    where
        T: Clone,
    {
        self.shard
            .lock()
            .entry(attributes.into())
            .or_default()
            .clone()
    }
}

impl<T> Instrument for Metric<T>
where
    T: MetricObserver + Default,
{
    fn report(&self, reporter: &mut dyn Reporter) {
        reporter.start_metric(self.name, self.description);
        for (attributes, recorder) in self.shard.lock().iter() {
            reporter.report_observation(attributes, recorder.observe());
        }
        reporter.finish_metric();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A monotonic counter.
#[derive(Debug, Clone, Default)]
pub struct U64Counter(Arc<AtomicU64>);

impl U64Counter {
    pub fn inc(&self, count: u64) {
        self.0.fetch_add(count, Ordering::Relaxed);
    }

    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl MetricObserver for U64Counter {
    fn observe(&self) -> Observation {
        Observation::U64Counter(self.fetch())
    }
}

/// A value that can go up and down.
#[derive(Debug, Clone, Default)]
pub struct U64Gauge(Arc<AtomicU64>);

impl U64Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn fetch(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl MetricObserver for U64Gauge {
    fn observe(&self) -> Observation {
        Observation::U64Gauge(self.fetch())
    }
}

const U64_BUCKET_BOUNDS: [u64; 10] = [1, 8, 32, 128, 512, 2048, 8192, 32768, 131072, u64::MAX];

#[derive(Debug)]
struct U64HistogramShard {
    buckets: [u64; U64_BUCKET_BOUNDS.len()],
    total: u64,
    sample_count: u64,
}

/// A histogram of `u64` values over fixed power-of-two-ish buckets.
#[derive(Debug, Clone)]
pub struct U64Histogram(Arc<Mutex<U64HistogramShard>>);

impl Default for U64Histogram {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(U64HistogramShard {
            buckets: [0; U64_BUCKET_BOUNDS.len()],
            total: 0,
            sample_count: 0,
        })))
    }
}

impl U64Histogram {
    pub fn record(&self, value: u64) {
        let mut shard = self.0.lock();
        let idx = U64_BUCKET_BOUNDS
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(U64_BUCKET_BOUNDS.len() - 1);
        shard.buckets[idx] += 1;
        shard.total = shard.total.wrapping_add(value);
        shard.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.0.lock().sample_count
    }
}

impl MetricObserver for U64Histogram {
    fn observe(&self) -> Observation {
        let shard = self.0.lock();
        Observation::U64Histogram(HistogramObservation {
            total: shard.total,
            buckets: U64_BUCKET_BOUNDS
                .iter()
                .zip(shard.buckets)
                .map(|(bound, count)| (*bound, count))
                .collect(),
            sample_count: shard.sample_count,
        })
    }
}

const DURATION_BUCKET_BOUNDS: [Duration; 10] = [
    Duration::from_millis(1),
    Duration::from_millis(4),
    Duration::from_millis(16),
    Duration::from_millis(64),
    Duration::from_millis(256),
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(16),
    Duration::from_secs(64),
    Duration::MAX,
];

#[derive(Debug)]
struct DurationHistogramShard {
    buckets: [u64; DURATION_BUCKET_BOUNDS.len()],
    total: Duration,
    sample_count: u64,
}

/// A histogram of [`Duration`]s, for request/GC timers.
#[derive(Debug, Clone)]
pub struct DurationHistogram(Arc<Mutex<DurationHistogramShard>>);

impl Default for DurationHistogram {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(DurationHistogramShard {
            buckets: [0; DURATION_BUCKET_BOUNDS.len()],
            total: Duration::ZERO,
            sample_count: 0,
        })))
    }
}

impl DurationHistogram {
    pub fn record(&self, value: Duration) {
        let mut shard = self.0.lock();
        let idx = DURATION_BUCKET_BOUNDS
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(DURATION_BUCKET_BOUNDS.len() - 1);
        shard.buckets[idx] += 1;
        shard.total = shard.total.saturating_add(value);
        shard.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.0.lock().sample_count
    }
}

impl MetricObserver for DurationHistogram {
    fn observe(&self) -> Observation {
        let shard = self.0.lock();
        Observation::DurationHistogram(HistogramObservation {
            total: shard.total,
            buckets: DURATION_BUCKET_BOUNDS
                .iter()
                .zip(shard.buckets)
                .map(|(bound, count)| (*bound, count))
                .collect(),
            sample_count: shard.sample_count,
        })
    }
}

/// A set of observations for a single metric, as collected by [`RawReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationSet {
    pub metric_name: &'static str,
    pub description: &'static str,
    pub observations: Vec<(Attributes, Observation)>,
}

impl ObservationSet {
    /// The observation for the given attributes, if any.
    pub fn observation(&self, attributes: impl Into<Attributes>) -> Option<&Observation> {
        let attributes = attributes.into();
        self.observations
            .iter()
            .find_map(|(a, o)| (a == &attributes).then_some(o))
    }
}

/// A [`Reporter`] that buffers observations, primarily for tests.
#[derive(Debug, Default)]
pub struct RawReporter {
    completed: Vec<ObservationSet>,
    in_progress: Option<ObservationSet>,
}

impl RawReporter {
    /// All completed observation sets, in report order.
    pub fn observations(&self) -> &[ObservationSet] {
        &self.completed
    }

    /// The observation set for the given metric name, if any.
    pub fn metric(&self, metric_name: &str) -> Option<&ObservationSet> {
        self.completed
            .iter()
            .find(|set| set.metric_name == metric_name)
    }
}

impl Reporter for RawReporter {
    fn start_metric(&mut self, metric_name: &'static str, description: &'static str) {
        assert!(self.in_progress.is_none(), "metric already in progress");
        self.in_progress = Some(ObservationSet {
            metric_name,
            description,
            observations: vec![],
        });
    }

    fn report_observation(&mut self, attributes: &Attributes, observation: Observation) {
        self.in_progress
            .as_mut()
            .expect("no metric in progress")
            .observations
            .push((attributes.clone(), observation));
    }

    fn finish_metric(&mut self) {
        let completed = self.in_progress.take().expect("no metric in progress");
        self.completed.push(completed);
    }
}
