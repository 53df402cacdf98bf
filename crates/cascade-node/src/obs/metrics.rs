//! Minimal metrics registry for a cascade node.
//!
//! Counter/gauge/histogram families with dynamic labels backed by `DashMap`.
//! Label sets are flattened into sorted key vectors so rendering order is
//! deterministic. Histogram buckets are fixed in milliseconds.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current value for one label set (0 if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, render_labels(r.key()), val);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    fn add(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{}{{{}}} {}", name, render_labels(r.key()), val);
        }
    }
}

// 5ms .. 30s; proxied calls are bounded by the rpc timeout.
const BUCKETS_MILLIS: [u64; 10] = [5, 10, 25, 50, 100, 250, 1_000, 5_000, 10_000, 30_000];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; 10],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(label_key(labels)).or_default();
        let millis = duration.as_millis() as u64;

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(millis, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MILLIS.iter().enumerate() {
            if millis <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let label_str = render_labels(r.key());
            let prefix = if label_str.is_empty() {
                String::new()
            } else {
                format!("{},", label_str)
            };

            for (i, &le) in BUCKETS_MILLIS.iter().enumerate() {
                let count = hist.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, label_str, hist.sum.load(Ordering::Relaxed));
            let _ = writeln!(out, "{}_count{{{}}} {}", name, label_str, count);
        }
    }
}

#[derive(Default)]
pub struct CascadeMetrics {
    /// Outbound registration attempts by result.
    pub upstream_connects: CounterVec,
    /// Inbound registrations by result (accepted/refused/replaced).
    pub registrations: CounterVec,
    pub clients_active: GaugeVec,
    /// Envelopes read, by role and kind.
    pub envelopes_in: CounterVec,
    /// Malformed envelopes/tags skipped, by lane.
    pub decode_errors: CounterVec,
    pub proxy_calls: CounterVec,
    pub proxy_duration: HistogramVec,
    /// Relayed media frames by role and tag kind.
    pub relay_frames: CounterVec,
    pub relay_errors: CounterVec,
    pub relays_active: GaugeVec,
}

impl CascadeMetrics {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.upstream_connects.render("cascade_upstream_connects_total", &mut out);
        self.registrations.render("cascade_registrations_total", &mut out);
        self.clients_active.render("cascade_clients_active", &mut out);
        self.envelopes_in.render("cascade_envelopes_in_total", &mut out);
        self.decode_errors.render("cascade_decode_errors_total", &mut out);
        self.proxy_calls.render("cascade_proxy_calls_total", &mut out);
        self.proxy_duration.render("cascade_proxy_duration_millis", &mut out);
        self.relay_frames.render("cascade_relay_frames_total", &mut out);
        self.relay_errors.render("cascade_relay_errors_total", &mut out);
        self.relays_active.render("cascade_relays_active", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_split_series() {
        let c = CounterVec::default();
        c.inc(&[("role", "pull"), ("kind", "video")]);
        c.inc(&[("kind", "video"), ("role", "pull")]);
        assert_eq!(c.get(&[("role", "pull"), ("kind", "video")]), 2);
    }

    #[test]
    fn histogram_renders_cumulative_buckets() {
        let m = CascadeMetrics::default();
        m.proxy_duration.observe(&[("result", "ok")], Duration::from_millis(30));
        let out = m.render();
        assert!(out.contains("cascade_proxy_duration_millis_bucket{result=\"ok\",le=\"25\"} 0"));
        assert!(out.contains("cascade_proxy_duration_millis_bucket{result=\"ok\",le=\"50\"} 1"));
        assert!(out.contains("cascade_proxy_duration_millis_count{result=\"ok\"} 1"));
    }
}
