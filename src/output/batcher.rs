//! Time- and size-based batching in front of a sync writer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::{AsyncWriter, SyncWriter};
use crate::transformer::Envelope;
use crate::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigBatcher {
    /// How often to flush pending events.
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
    /// How many messages to flush together.
    #[serde(default = "default_flush_messages")]
    pub flush_messages: usize,
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_flush_messages() -> usize {
    5000
}

#[derive(Default)]
struct BatchState {
    envelopes: Vec<Envelope>,
    first_write: Option<Instant>,
}

/// Buffers envelopes and hands them to the inner writer once either the size
/// or the age threshold trips. The time-based flush only fires on a
/// subsequent `write_async`; the pipeline flushes once more on shutdown to
/// drain the tail.
pub struct Batcher<W> {
    parent: W,
    cfg: ConfigBatcher,
    state: Mutex<BatchState>,
}

impl<W: SyncWriter> Batcher<W> {
    pub fn new(parent: W, cfg: ConfigBatcher) -> Self {
        Self {
            parent,
            cfg,
            state: Mutex::new(BatchState::default()),
        }
    }

    /// The buffer is cleared before the result is known: after an error the
    /// batcher is undefined and the caller must stop using it.
    async fn flush_locked(&self, state: &mut BatchState) -> Result<(), Error> {
        let envelopes = std::mem::take(&mut state.envelopes);
        state.first_write = None;
        self.parent.write(&envelopes).await
    }
}

#[async_trait]
impl<W: SyncWriter> AsyncWriter for Batcher<W> {
    async fn write_async(&self, envs: Vec<Envelope>) -> Result<(), Error> {
        let mut state = self.state.lock().await;

        if state.envelopes.is_empty() {
            state.first_write = Some(Instant::now());
        }
        let time_trip = state
            .first_write
            .map_or(false, |first| first.elapsed() >= self.cfg.flush_interval);

        state.envelopes.extend(envs);
        let size_trip = state.envelopes.len() >= self.cfg.flush_messages;

        if size_trip || time_trip {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }
}
