//! Statistics transport (§3, §4.6): the typed "stat tracker" interface and
//! its aggregation/serialization contract.
//!
//! The reference implementation uses `newInstance()` reflection to make an
//! empty companion tracker before merging; Design Note §9 replaces that with
//! a `Clone`-based `new_like()` method, so aggregation needs no reflection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Every tracker variant shares these serializable identity fields, shown in
/// job/tube-style stats responses (mirrors the `#[serde(rename = ...)]`
/// convention of `wire::protocol::TubeStats`).
pub trait StatTracker: Send {
    /// The name operators and the wire protocol use to address this
    /// tracker (e.g. "Operations Completed").
    fn display_name(&self) -> &str;

    /// The configured collection interval, in seconds. Aggregation requires
    /// every input tracker of the same name to share this value (§3, §4.6).
    fn interval_secs(&self) -> u32;

    /// Number of per-interval slots collected so far.
    fn interval_count(&self) -> usize;

    /// Produces a fresh, empty tracker with the same identity (name,
    /// interval) as `self`, to serve as the aggregation accumulator.
    fn new_like(&self) -> Box<dyn StatTracker>;

    /// Folds `other`'s per-interval data into `self` using this variant's
    /// aggregation rule (§4.6). `other` must share `self`'s interval;
    /// callers are responsible for checking this before calling (see
    /// [`aggregate`]).
    fn merge(&mut self, other: &dyn StatTracker);

    /// A short human-readable one-line summary (the "summary" rendering
    /// referenced in §4.6; detail/graphing renderings are out of scope).
    fn summary(&self) -> String;

    fn as_any(&self) -> &dyn std::any::Any;
}

/// Aggregates a non-empty slice of same-named trackers into one, applying
/// each variant's own `merge` rule. Returns `None` if `trackers` is empty or
/// if the trackers don't all share an interval (Open Question #3: a
/// mismatch is the caller's job to detect and reject, not silently average).
pub fn aggregate(trackers: &[Box<dyn StatTracker>]) -> Option<Box<dyn StatTracker>> {
    let first = trackers.first()?;
    let interval = first.interval_secs();
    if trackers.iter().any(|t| t.interval_secs() != interval) {
        return None;
    }

    let mut acc = first.new_like();
    for t in trackers {
        acc.merge(t.as_ref());
    }
    Some(acc)
}

/// counter / bytes-per-interval: per-interval sum across inputs.
#[derive(Clone, Debug, Serialize)]
pub struct CounterTracker {
    name: String,
    interval_secs: u32,
    /// per-interval sums, indexed by interval number
    intervals: Vec<i64>,
}

impl CounterTracker {
    pub fn new(name: impl Into<String>, interval_secs: u32) -> Self {
        Self { name: name.into(), interval_secs, intervals: Vec::new() }
    }

    pub fn record(&mut self, interval: usize, value: i64) {
        if self.intervals.len() <= interval {
            self.intervals.resize(interval + 1, 0);
        }
        self.intervals[interval] += value;
    }

    pub fn total(&self) -> i64 {
        self.intervals.iter().sum()
    }

    pub fn intervals(&self) -> &[i64] {
        &self.intervals
    }
}

impl StatTracker for CounterTracker {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    fn new_like(&self) -> Box<dyn StatTracker> {
        Box::new(Self::new(self.name.clone(), self.interval_secs))
    }

    fn merge(&mut self, other: &dyn StatTracker) {
        let other = other.as_any().downcast_ref::<CounterTracker>().expect("merge type mismatch");
        if self.intervals.len() < other.intervals.len() {
            self.intervals.resize(other.intervals.len(), 0);
        }
        for (i, v) in other.intervals.iter().enumerate() {
            self.intervals[i] += v;
        }
    }

    fn summary(&self) -> String {
        format!("{}: {}", self.name, self.total())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// time-series of doubles: per-interval mean across inputs.
#[derive(Clone, Debug, Serialize)]
pub struct TimeSeriesTracker {
    name: String,
    interval_secs: u32,
    /// (sum, count) per interval, so repeated merges stay an exact running
    /// mean rather than a mean-of-means.
    intervals: Vec<(f64, u64)>,
}

impl TimeSeriesTracker {
    pub fn new(name: impl Into<String>, interval_secs: u32) -> Self {
        Self { name: name.into(), interval_secs, intervals: Vec::new() }
    }

    pub fn record(&mut self, interval: usize, value: f64) {
        if self.intervals.len() <= interval {
            self.intervals.resize(interval + 1, (0.0, 0));
        }
        let (sum, count) = &mut self.intervals[interval];
        *sum += value;
        *count += 1;
    }

    pub fn mean_at(&self, interval: usize) -> Option<f64> {
        self.intervals.get(interval).filter(|(_, c)| *c > 0).map(|(s, c)| s / *c as f64)
    }

    pub fn overall_mean(&self) -> Option<f64> {
        let (sum, count): (f64, u64) =
            self.intervals.iter().fold((0.0, 0), |(s, c), (is, ic)| (s + is, c + ic));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

impl StatTracker for TimeSeriesTracker {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    fn new_like(&self) -> Box<dyn StatTracker> {
        Box::new(Self::new(self.name.clone(), self.interval_secs))
    }

    fn merge(&mut self, other: &dyn StatTracker) {
        let other =
            other.as_any().downcast_ref::<TimeSeriesTracker>().expect("merge type mismatch");
        if self.intervals.len() < other.intervals.len() {
            self.intervals.resize(other.intervals.len(), (0.0, 0));
        }
        for (i, (sum, count)) in other.intervals.iter().enumerate() {
            self.intervals[i].0 += sum;
            self.intervals[i].1 += count;
        }
    }

    fn summary(&self) -> String {
        match self.overall_mean() {
            Some(mean) => format!("{}: mean={mean:.3}", self.name),
            None => format!("{}: (no data)", self.name),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// categorical-counter: per-label sum.
#[derive(Clone, Debug, Serialize)]
pub struct CategoricalCounterTracker {
    name: String,
    interval_secs: u32,
    counts: BTreeMap<String, i64>,
}

impl CategoricalCounterTracker {
    pub fn new(name: impl Into<String>, interval_secs: u32) -> Self {
        Self { name: name.into(), interval_secs, counts: BTreeMap::new() }
    }

    pub fn increment(&mut self, label: impl Into<String>, by: i64) {
        *self.counts.entry(label.into()).or_insert(0) += by;
    }

    pub fn counts(&self) -> &BTreeMap<String, i64> {
        &self.counts
    }
}

impl StatTracker for CategoricalCounterTracker {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    // Categorical counters have no interval slots of their own; treat them
    // as always having exactly one logical slot once any label is set.
    fn interval_count(&self) -> usize {
        usize::from(!self.counts.is_empty())
    }

    fn new_like(&self) -> Box<dyn StatTracker> {
        Box::new(Self::new(self.name.clone(), self.interval_secs))
    }

    fn merge(&mut self, other: &dyn StatTracker) {
        let other = other
            .as_any()
            .downcast_ref::<CategoricalCounterTracker>()
            .expect("merge type mismatch");
        for (label, count) in &other.counts {
            *self.counts.entry(label.clone()).or_insert(0) += count;
        }
    }

    fn summary(&self) -> String {
        format!("{}: {} labels", self.name, self.counts.len())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// histogram: per-bucket sum over a fixed set of bucket upper-bounds.
#[derive(Clone, Debug, Serialize)]
pub struct HistogramTracker {
    name: String,
    interval_secs: u32,
    /// bucket upper bounds, ascending; the last bucket catches everything
    /// above the second-to-last bound.
    bounds: Vec<f64>,
    counts: Vec<u64>,
}

impl HistogramTracker {
    pub fn new(name: impl Into<String>, interval_secs: u32, bounds: Vec<f64>) -> Self {
        let counts = vec![0; bounds.len()];
        Self { name: name.into(), interval_secs, bounds, counts }
    }

    pub fn record(&mut self, value: f64) {
        let bucket = self.bounds.iter().position(|&b| value <= b).unwrap_or(self.bounds.len() - 1);
        self.counts[bucket] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }
}

impl StatTracker for HistogramTracker {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    fn interval_count(&self) -> usize {
        1
    }

    fn new_like(&self) -> Box<dyn StatTracker> {
        Box::new(Self::new(self.name.clone(), self.interval_secs, self.bounds.clone()))
    }

    fn merge(&mut self, other: &dyn StatTracker) {
        let other = other.as_any().downcast_ref::<HistogramTracker>().expect("merge type mismatch");
        assert_eq!(self.bounds, other.bounds, "histogram bucket bounds must match to aggregate");
        for (i, c) in other.counts.iter().enumerate() {
            self.counts[i] += c;
        }
    }

    fn summary(&self) -> String {
        format!("{}: {} buckets, {} samples", self.name, self.bounds.len(), self.counts.iter().sum::<u64>())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Wire-transportable form of a tracker, carried opaquely in
/// `JobResponse::statistics` and `RealTimeStatistics::payload` (§4.6).
/// `Box<dyn StatTracker>` cannot derive `Serialize`/`Deserialize` itself, so
/// the client and scheduler convert through this enum at the connection
/// boundary and reconstruct the concrete tracker on the other side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireTracker {
    Counter { name: String, interval_secs: u32, intervals: Vec<i64> },
    TimeSeries { name: String, interval_secs: u32, intervals: Vec<(f64, u64)> },
    Categorical { name: String, interval_secs: u32, counts: BTreeMap<String, i64> },
    Histogram { name: String, interval_secs: u32, bounds: Vec<f64>, counts: Vec<u64> },
}

impl WireTracker {
    /// Converts a live tracker into its wire form, or `None` if it is a
    /// variant this crate doesn't know how to transport (future Job-Class
    /// plug-ins are expected to emit one of the four built-in kinds).
    pub fn from_tracker(tracker: &dyn StatTracker) -> Option<Self> {
        let any = tracker.as_any();
        if let Some(t) = any.downcast_ref::<CounterTracker>() {
            return Some(Self::Counter {
                name: t.name.clone(),
                interval_secs: t.interval_secs,
                intervals: t.intervals.clone(),
            });
        }
        if let Some(t) = any.downcast_ref::<TimeSeriesTracker>() {
            return Some(Self::TimeSeries {
                name: t.name.clone(),
                interval_secs: t.interval_secs,
                intervals: t.intervals.clone(),
            });
        }
        if let Some(t) = any.downcast_ref::<CategoricalCounterTracker>() {
            return Some(Self::Categorical {
                name: t.name.clone(),
                interval_secs: t.interval_secs,
                counts: t.counts.clone(),
            });
        }
        if let Some(t) = any.downcast_ref::<HistogramTracker>() {
            return Some(Self::Histogram {
                name: t.name.clone(),
                interval_secs: t.interval_secs,
                bounds: t.bounds.clone(),
                counts: t.counts.clone(),
            });
        }
        None
    }

    pub fn into_tracker(self) -> Box<dyn StatTracker> {
        match self {
            Self::Counter { name, interval_secs, intervals } => {
                Box::new(CounterTracker { name, interval_secs, intervals })
            },
            Self::TimeSeries { name, interval_secs, intervals } => {
                Box::new(TimeSeriesTracker { name, interval_secs, intervals })
            },
            Self::Categorical { name, interval_secs, counts } => {
                Box::new(CategoricalCounterTracker { name, interval_secs, counts })
            },
            Self::Histogram { name, interval_secs, bounds, counts } => {
                Box::new(HistogramTracker { name, interval_secs, bounds, counts })
            },
        }
    }
}

/// Serializes a set of trackers into the opaque payload carried on the wire
/// (§4.6), using the same YAML canonical form the protocol already uses for
/// parameter bags.
pub fn encode_trackers(trackers: &[Box<dyn StatTracker>]) -> Vec<u8> {
    let wire: Vec<WireTracker> =
        trackers.iter().filter_map(|t| WireTracker::from_tracker(t.as_ref())).collect();
    serde_yaml::to_string(&wire).expect("trackers are always serializable").into_bytes()
}

pub fn decode_trackers(payload: &[u8]) -> Result<Vec<Box<dyn StatTracker>>, serde_yaml::Error> {
    let text = String::from_utf8_lossy(payload);
    let wire: Vec<WireTracker> = serde_yaml::from_str(&text)?;
    Ok(wire.into_iter().map(WireTracker::into_tracker).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_counter_values() {
        let mut c = CounterTracker::new("ops", 10);
        c.record(0, 5);
        let trackers: Vec<Box<dyn StatTracker>> = vec![Box::new(c)];
        let payload = encode_trackers(&trackers);
        let back = decode_trackers(&payload).unwrap();
        assert_eq!(back[0].as_any().downcast_ref::<CounterTracker>().unwrap().total(), 5);
    }

    #[test]
    fn aggregate_identity_for_counter() {
        let mut c = CounterTracker::new("ops", 10);
        c.record(0, 5);
        c.record(1, 7);
        let boxed: Box<dyn StatTracker> = Box::new(c.clone());
        let agg = aggregate(std::slice::from_ref(&boxed)).unwrap();
        let agg = agg.as_any().downcast_ref::<CounterTracker>().unwrap();
        assert_eq!(agg.intervals(), c.intervals());
    }

    #[test]
    fn aggregate_commutative_for_counter() {
        let mut a = CounterTracker::new("ops", 10);
        a.record(0, 3);
        let mut b = CounterTracker::new("ops", 10);
        b.record(0, 4);

        let ab: Vec<Box<dyn StatTracker>> = vec![Box::new(a.clone()), Box::new(b.clone())];
        let ba: Vec<Box<dyn StatTracker>> = vec![Box::new(b), Box::new(a)];

        let agg_ab = aggregate(&ab).unwrap();
        let agg_ba = aggregate(&ba).unwrap();
        assert_eq!(
            agg_ab.as_any().downcast_ref::<CounterTracker>().unwrap().intervals(),
            agg_ba.as_any().downcast_ref::<CounterTracker>().unwrap().intervals(),
        );
    }

    #[test]
    fn aggregate_rejects_interval_mismatch() {
        let a: Box<dyn StatTracker> = Box::new(CounterTracker::new("ops", 10));
        let b: Box<dyn StatTracker> = Box::new(CounterTracker::new("ops", 30));
        assert!(aggregate(&[a, b]).is_none());
    }

    #[test]
    fn time_series_mean_aggregation() {
        let mut a = TimeSeriesTracker::new("latency", 10);
        a.record(0, 10.0);
        let mut b = TimeSeriesTracker::new("latency", 10);
        b.record(0, 20.0);

        let agg = aggregate(&[Box::new(a), Box::new(b)]).unwrap();
        let agg = agg.as_any().downcast_ref::<TimeSeriesTracker>().unwrap();
        assert_eq!(agg.mean_at(0), Some(15.0));
    }
}
