use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RunMetrics {
    tickets_processed: AtomicU64,
    prs_created: AtomicU64,
    retries: AtomicU64,
    generation_failures: AtomicU64,
    validation_failures: AtomicU64,
    gate_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub tickets_processed: u64,
    pub prs_created: u64,
    pub retries: u64,
    pub generation_failures: u64,
    pub validation_failures: u64,
    pub gate_failures: u64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_tickets_processed(&self) {
        self.tickets_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_prs_created(&self) {
        self.prs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retries(&self, count: u32) {
        if count > 0 {
            self.retries.fetch_add(u64::from(count), Ordering::Relaxed);
        }
    }

    pub fn inc_generation_failures(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_validation_failures(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gate_failures(&self) {
        self.gate_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tickets_processed: self.tickets_processed.load(Ordering::Relaxed),
            prs_created: self.prs_created.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            gate_failures: self.gate_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} prs={} retries={} generation_failures={} validation_failures={} gate_failures={}",
            self.tickets_processed,
            self.prs_created,
            self.retries,
            self.generation_failures,
            self.validation_failures,
            self.gate_failures
        )
    }
}
