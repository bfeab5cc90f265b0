use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
};

/// Process-wide fan-out counters, rendered at `GET /metrics`.
#[derive(Default)]
pub struct RelayMetrics {
    connections_total: Mutex<BTreeMap<String, u64>>,
    active_connections: AtomicI64,
    envelopes_published_total: AtomicU64,
    deliveries_total: AtomicU64,
    deliveries_filtered_total: AtomicU64,
    frames_rejected_total: Mutex<BTreeMap<String, u64>>,
    lagged_envelopes_total: AtomicU64,
    bridge_relays_total: AtomicU64,
    bridge_relay_failures_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

/// Counts a finished handshake by outcome: `accepted`, `auth_failed`,
/// `denied` or `error`.
pub fn record_connection(outcome: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_connection(outcome);
    }
}

pub fn connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn record_published() {
    if let Some(metrics) = global_metrics() {
        metrics.record_published();
    }
}

pub fn record_delivery(delivered: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.record_delivery(delivered);
    }
}

pub fn record_rejected(code: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_rejected(code);
    }
}

pub fn record_lagged(skipped: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.lagged_envelopes_total.fetch_add(skipped, Ordering::SeqCst);
    }
}

pub fn record_bridge_relay(succeeded: bool) {
    if let Some(metrics) = global_metrics() {
        metrics.record_bridge_relay(succeeded);
    }
}

impl RelayMetrics {
    pub fn record_connection(&self, outcome: &str) {
        increment_label_counter(&self.connections_total, outcome);
    }

    pub fn record_published(&self) {
        self.envelopes_published_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_delivery(&self, delivered: bool) {
        let counter =
            if delivered { &self.deliveries_total } else { &self.deliveries_filtered_total };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_rejected(&self, code: &str) {
        increment_label_counter(&self.frames_rejected_total, code);
    }

    pub fn record_bridge_relay(&self, succeeded: bool) {
        self.bridge_relays_total.fetch_add(1, Ordering::SeqCst);
        if !succeeded {
            self.bridge_relay_failures_total.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        push_header(&mut output, "relay_connections_total", "counter", "Handshakes by outcome.");
        append_label_counter_lines(
            &mut output,
            "relay_connections_total",
            "outcome",
            &self.connections_total,
        );

        push_gauge(
            &mut output,
            "relay_active_connections",
            "Sockets currently subscribed to a room.",
            self.active_connections.load(Ordering::SeqCst),
        );
        push_counter(
            &mut output,
            "relay_envelopes_published_total",
            "Envelopes published to a room.",
            self.envelopes_published_total.load(Ordering::SeqCst),
        );
        push_counter(
            &mut output,
            "relay_deliveries_total",
            "Envelopes written to a subscriber socket.",
            self.deliveries_total.load(Ordering::SeqCst),
        );
        push_counter(
            &mut output,
            "relay_deliveries_filtered_total",
            "Envelopes dropped by the authorization filter.",
            self.deliveries_filtered_total.load(Ordering::SeqCst),
        );

        push_header(
            &mut output,
            "relay_frames_rejected_total",
            "counter",
            "Inbound frames rejected by error type.",
        );
        append_label_counter_lines(
            &mut output,
            "relay_frames_rejected_total",
            "type",
            &self.frames_rejected_total,
        );

        push_counter(
            &mut output,
            "relay_lagged_envelopes_total",
            "Envelopes skipped by subscribers that fell behind.",
            self.lagged_envelopes_total.load(Ordering::SeqCst),
        );
        push_counter(
            &mut output,
            "relay_bridge_relays_total",
            "Publish bridge relay attempts.",
            self.bridge_relays_total.load(Ordering::SeqCst),
        );
        push_counter(
            &mut output,
            "relay_bridge_relay_failures_total",
            "Publish bridge relays that failed to connect or send.",
            self.bridge_relay_failures_total.load(Ordering::SeqCst),
        );

        output
    }
}

fn lock(map: &Mutex<BTreeMap<String, u64>>) -> MutexGuard<'_, BTreeMap<String, u64>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn increment_label_counter(map: &Mutex<BTreeMap<String, u64>>, label: &str) {
    let label = label.trim().to_ascii_lowercase();
    let label = if label.is_empty() { "unknown".to_string() } else { label };
    let mut guard = lock(map);
    let value = guard.entry(label).or_insert(0);
    *value = value.saturating_add(1);
}

fn push_header(output: &mut String, name: &str, kind: &str, help: &str) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} {kind}\n"));
}

fn push_counter(output: &mut String, name: &str, help: &str, value: u64) {
    push_header(output, name, "counter", help);
    output.push_str(&format!("{name} {value}\n"));
}

fn push_gauge(output: &mut String, name: &str, help: &str, value: i64) {
    push_header(output, name, "gauge", help);
    output.push_str(&format!("{name} {}\n", value.max(0)));
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<BTreeMap<String, u64>>,
) {
    for (label, value) in lock(map).iter() {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
