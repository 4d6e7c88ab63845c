use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build prometheus exporter: {0}")]
    Exporter(String),
}

pub struct Metrics {
    request_counter: Counter<u64>,
    frames_encoded: Counter<u64>,
    frames_sent: Counter<u64>,
    ticks_skipped: Counter<u64>,
    results_received: Counter<u64>,
    encode_duration: Histogram<u64>,
    total_vehicles: Gauge<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("detection_client");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let frames_encoded = meter
            .u64_counter("frames_encoded_total")
            .with_description("Frames sampled and encoded for transmission")
            .build();

        let frames_sent = meter
            .u64_counter("frames_sent_total")
            .with_description("Frames sent to the detection backend")
            .build();

        let ticks_skipped = meter
            .u64_counter("ticks_skipped_total")
            .with_description("Refresh ticks without a displayable frame")
            .build();

        let results_received = meter
            .u64_counter("results_received_total")
            .with_description("Detection results received from the backend")
            .build();

        let boundaries = generate_boundaries((1, 11, 15, 95, 495));

        let encode_duration = meter
            .u64_histogram("frame_encode_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of frame sampling and encoding in milliseconds")
            .build();

        let total_vehicles = meter
            .u64_gauge("total_vehicles")
            .with_description("Latest tally reported by the backend")
            .build();

        Ok(Metrics {
            request_counter,
            frames_encoded,
            frames_sent,
            ticks_skipped,
            results_received,
            encode_duration,
            total_vehicles,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_frame_encoded(&self, encode_duration_ms: u64) {
        self.frames_encoded.add(1, &[]);
        self.encode_duration.record(encode_duration_ms, &[]);
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.add(1, &[]);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.add(1, &[]);
    }

    pub fn record_result(&self, total_vehicles: u64) {
        self.results_received.add(1, &[]);
        self.total_vehicles.record(total_vehicles, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 2;
    let middle_step: usize = 1;
    let end_step: usize = 10;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
