//! Pipeline stats: six monotonic counters with last-event timestamps and
//! derived per-second rates, mirrored into prometheus counters.

use std::env;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use prometheus::{IntCounter, Registry};
use serde::Serialize;

/// Environment variable carrying the instance index used to tell apart stats
/// from different instances.
pub const ENV_CF_INSTANCE_INDEX: &str = "CF_INSTANCE_INDEX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Messages received from the bus.
    Consume,
    /// Messages enriched.
    Enrich,
    /// Messages that failed to be enriched.
    EnrichFail,
    /// Points handed to the output batch.
    WriteAsync,
    /// Points durably written and committed.
    Write,
    /// Platform API lookup failures.
    CfFail,
}

#[derive(Debug, Default, Clone, Copy)]
struct Track {
    total: u64,
    per_sec: u64,
    prev: u64,
    last: Option<DateTime<Utc>>,
}

impl Track {
    fn inc(&mut self, value: u64) {
        self.total += value;
        self.last = Some(Utc::now());
    }

    fn tick(&mut self) {
        self.per_sec = self.total - self.prev;
        self.prev = self.total;
    }
}

#[derive(Default)]
struct StatsInner {
    consume: Track,
    enrich: Track,
    enrich_fail: Track,
    write_async: Track,
    write: Track,
    cf_fail: Track,
}

/// Counters snapshot as served on the stats endpoint and logged once per
/// minute.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub consume: u64,
    pub consume_per_sec: u64,
    pub enrich: u64,
    pub enrich_per_sec: u64,
    pub enrichfail: u64,
    pub enrichfail_per_sec: u64,
    pub writeasync: u64,
    pub writeasync_per_sec: u64,
    pub write: u64,
    pub write_per_sec: u64,
    pub cffail: u64,
    pub cffail_per_sec: u64,
    pub last_consume_time: Option<DateTime<Utc>>,
    pub last_enrich_time: Option<DateTime<Utc>>,
    pub last_enrich_fail_time: Option<DateTime<Utc>>,
    pub last_writeasync_time: Option<DateTime<Utc>>,
    pub last_write_time: Option<DateTime<Utc>>,
    pub last_cffail_time: Option<DateTime<Utc>>,
    pub instance_index: i32,
}

struct PromCounters {
    consume: IntCounter,
    enrich: IntCounter,
    enrich_fail: IntCounter,
    write_async: IntCounter,
    write: IntCounter,
    cf_fail: IntCounter,
}

pub struct Stats {
    inner: Mutex<StatsInner>,
    instance_index: i32,
    registry: Registry,
    prom: PromCounters,
}

impl Stats {
    pub fn new() -> Self {
        Self::with_instance_index(parse_instance_index(
            env::var(ENV_CF_INSTANCE_INDEX).ok().as_deref(),
        ))
    }

    pub fn with_instance_index(instance_index: i32) -> Self {
        // The registry is owned rather than global so independent instances
        // never clash on registration.
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            let c = IntCounter::new(name, help).unwrap();
            registry.register(Box::new(c.clone())).unwrap();
            c
        };
        let prom = PromCounters {
            consume: counter("cfmr_consume_total", "messages received"),
            enrich: counter("cfmr_enrich_total", "messages enriched"),
            enrich_fail: counter("cfmr_enrich_fail_total", "messages failed to enrich"),
            write_async: counter("cfmr_write_async_total", "points added to output batch"),
            write: counter("cfmr_write_total", "points written and committed"),
            cf_fail: counter("cfmr_cf_fail_total", "platform API lookup failures"),
        };

        Self {
            inner: Mutex::new(StatsInner::default()),
            instance_index,
            registry,
            prom,
        }
    }

    pub fn inc(&self, counter: Counter, value: u64) {
        let mut inner = self.inner.lock().unwrap();
        match counter {
            Counter::Consume => {
                inner.consume.inc(value);
                self.prom.consume.inc_by(value);
            }
            Counter::Enrich => {
                inner.enrich.inc(value);
                self.prom.enrich.inc_by(value);
            }
            Counter::EnrichFail => {
                inner.enrich_fail.inc(value);
                self.prom.enrich_fail.inc_by(value);
            }
            Counter::WriteAsync => {
                inner.write_async.inc(value);
                self.prom.write_async.inc_by(value);
            }
            Counter::Write => {
                inner.write.inc(value);
                self.prom.write.inc_by(value);
            }
            Counter::CfFail => {
                inner.cf_fail.inc(value);
                self.prom.cf_fail.inc_by(value);
            }
        }
    }

    /// Recomputes the per-second rates from the totals seen since the last
    /// call. Driven by a one-second ticker in the pipeline.
    pub fn tick_per_sec(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consume.tick();
        inner.enrich.tick();
        inner.enrich_fail.tick();
        inner.write_async.tick();
        inner.write.tick();
        inner.cf_fail.tick();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().unwrap();
        StatsSnapshot {
            consume: inner.consume.total,
            consume_per_sec: inner.consume.per_sec,
            enrich: inner.enrich.total,
            enrich_per_sec: inner.enrich.per_sec,
            enrichfail: inner.enrich_fail.total,
            enrichfail_per_sec: inner.enrich_fail.per_sec,
            writeasync: inner.write_async.total,
            writeasync_per_sec: inner.write_async.per_sec,
            write: inner.write.total,
            write_per_sec: inner.write.per_sec,
            cffail: inner.cf_fail.total,
            cffail_per_sec: inner.cf_fail.per_sec,
            last_consume_time: inner.consume.last,
            last_enrich_time: inner.enrich.last,
            last_enrich_fail_time: inner.enrich_fail.last,
            last_writeasync_time: inner.write_async.last,
            last_write_time: inner.write.last,
            last_cffail_time: inner.cf_fail.last,
            instance_index: self.instance_index,
        }
    }

    pub fn json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }

    /// Prometheus registry backing the `/metrics` endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_instance_index(value: Option<&str>) -> i32 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}
