//! Heap metrics using metrics-rs.
//!
//! Recording goes through the `metrics` facade, so any recorder works. The
//! CLI installs [`CliRecorder`] and prints a summary at exit.

use std::collections::HashMap;
use std::sync::Arc;

use fbheap_alloc::{AllocatorStats, HeapError, SizeClass};
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;

// ============================================================================
// Metric descriptions
// ============================================================================

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "fbheap_allocations_total",
        Unit::Count,
        "Successful allocations, by size class"
    );
    describe_counter!(
        "fbheap_deallocations_total",
        Unit::Count,
        "Successful deallocations"
    );
    describe_counter!(
        "fbheap_failures_total",
        Unit::Count,
        "Rejected allocate/deallocate calls, by error kind"
    );

    describe_gauge!("fbheap_bytes_in_use", Unit::Bytes, "Live payload plus prefix bytes");
    describe_gauge!("fbheap_bumper_bytes", Unit::Bytes, "Bump allocation high-water mark");
    describe_gauge!(
        "fbheap_peak_bytes_in_use",
        Unit::Bytes,
        "Largest bytes in use since the heap was created"
    );
    describe_gauge!("fbheap_utilization", Unit::Count, "Bytes in use / usable size (0-1)");

    describe_histogram!(
        "fbheap_request_size_bytes",
        Unit::Bytes,
        "Requested allocation sizes"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Record a successful allocation of `size` bytes.
pub fn record_allocation(size: u32, class: SizeClass) {
    counter!("fbheap_allocations_total", "class" => class.block_size().to_string()).increment(1);
    histogram!("fbheap_request_size_bytes").record(f64::from(size));
}

pub fn record_deallocation() {
    counter!("fbheap_deallocations_total").increment(1);
}

/// Record a rejected call, labelled with the error kind.
pub fn record_failure(error: &HeapError) {
    counter!("fbheap_failures_total", "kind" => error.kind()).increment(1);
}

/// Publish a stats snapshot as gauges.
pub fn record_stats(stats: &AllocatorStats) {
    gauge!("fbheap_bytes_in_use").set(f64::from(stats.bytes_in_use));
    gauge!("fbheap_bumper_bytes").set(f64::from(stats.bumper));
    gauge!("fbheap_peak_bytes_in_use").set(f64::from(stats.peak_bytes_in_use));
    gauge!("fbheap_utilization").set(stats.utilization());
}

// ============================================================================
// CLI Recorder for terminal output
// ============================================================================

/// Values collected by the CLI recorder, keyed by rendered metric key.
#[derive(Default)]
struct Storage {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
}

/// Metric handle bound to one key of the shared storage.
struct CliHandle {
    key: String,
    storage: Arc<Storage>,
}

impl metrics::CounterFn for CliHandle {
    fn increment(&self, value: u64) {
        *self.storage.counters.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.counters.write().insert(self.key.clone(), value);
    }
}

impl metrics::GaugeFn for CliHandle {
    fn increment(&self, value: f64) {
        *self.storage.gauges.write().entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.storage.gauges.write().entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.gauges.write().insert(self.key.clone(), value);
    }
}

impl metrics::HistogramFn for CliHandle {
    fn record(&self, value: f64) {
        self.storage
            .histograms
            .write()
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

/// In-memory recorder printed as a summary by the CLI.
#[derive(Default)]
pub struct CliRecorder {
    storage: Arc<Storage>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder.
    ///
    /// Returns `None` if another recorder is already installed.
    pub fn install(self) -> Option<CliRecorderHandle> {
        let storage = Arc::clone(&self.storage);
        metrics::set_global_recorder(self).ok()?;
        Some(CliRecorderHandle { storage })
    }

    fn handle(&self, key: &Key) -> Arc<CliHandle> {
        Arc::new(CliHandle {
            key: key_to_string(key),
            storage: Arc::clone(&self.storage),
        })
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.handle(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.handle(key))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.handle(key))
    }
}

/// Read access to what the installed [`CliRecorder`] collected.
pub struct CliRecorderHandle {
    storage: Arc<Storage>,
}

impl CliRecorderHandle {
    /// Print all collected metrics, sorted by key.
    pub fn print_summary(&self) {
        let counters = self.storage.counters.read();
        let gauges = self.storage.gauges.read();
        let histograms = self.storage.histograms.read();

        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            println!("No metrics collected.");
            return;
        }

        println!();
        println!("## Metrics Summary");

        if !counters.is_empty() {
            println!();
            println!("### Counters");
            for (key, value) in sorted(&counters) {
                println!("  {key}: {value}");
            }
        }

        if !gauges.is_empty() {
            println!();
            println!("### Gauges");
            for (key, value) in sorted(&gauges) {
                println!("  {key}: {value:.3}");
            }
        }

        if !histograms.is_empty() {
            println!();
            println!("### Histograms");
            for (key, values) in sorted(&histograms) {
                if values.is_empty() {
                    continue;
                }
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                #[allow(clippy::cast_precision_loss)]
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                println!(
                    "  {key}: count={}, min={min:.0}, max={max:.0}, avg={avg:.1}",
                    values.len()
                );
            }
        }
        println!();
    }
}

fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{CounterFn, GaugeFn, HistogramFn, Label};

    #[test]
    fn test_key_to_string() {
        let key = Key::from_name("fbheap_deallocations_total");
        assert_eq!(key_to_string(&key), "fbheap_deallocations_total");

        let key = Key::from_parts("fbheap_allocations_total", vec![Label::new("class", "8")]);
        assert_eq!(key_to_string(&key), "fbheap_allocations_total{class=8}");

        let key = Key::from_parts(
            "fbheap_failures_total",
            vec![Label::new("kind", "double_free"), Label::new("op", "free")],
        );
        assert_eq!(key_to_string(&key), "fbheap_failures_total{kind=double_free,op=free}");
    }

    #[test]
    fn test_cli_handle_storage() {
        let recorder = CliRecorder::new();
        let handle = recorder.handle(&Key::from_name("fbheap_bytes_in_use"));

        CounterFn::increment(&*handle, 5);
        CounterFn::increment(&*handle, 2);
        assert_eq!(recorder.storage.counters.read().get("fbheap_bytes_in_use"), Some(&7));

        GaugeFn::set(&*handle, 64.0);
        GaugeFn::decrement(&*handle, 16.0);
        let gauge = recorder.storage.gauges.read()["fbheap_bytes_in_use"];
        assert!((gauge - 48.0).abs() < f64::EPSILON);

        HistogramFn::record(&*handle, 8.0);
        assert_eq!(
            recorder.storage.histograms.read().get("fbheap_bytes_in_use").map(Vec::len),
            Some(1)
        );
    }
}
