//! Wires input, enrichment, transformation and output together and drives
//! the periodic control loops that keep the caches and stats healthy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::Config;
use crate::debug::{self, Counter, Stats};
use crate::enricher::{CfCallback, CfClient, Enricher, MetadataCache, NegativeCache, Retrier};
use crate::input::{KafkaReader, Reader};
use crate::output::{self, AsyncWriter, Batcher, Committer, InfluxDb};
use crate::{Error, APP_NAME, VERSION};

pub struct Refinery {
    conf: Config,
}

impl Refinery {
    pub fn new(conf: Config) -> Self {
        Self { conf }
    }

    pub async fn run(&self) -> Result<(), Error> {
        let user_agent = format!("{APP_NAME}/{VERSION}");

        let stats = Arc::new(Stats::new());
        tokio::spawn(per_sec_loop(stats.clone()));
        tokio::spawn(stats_emit_loop(stats.clone()));

        let server = debug::start(&self.conf.server, stats.clone())?;

        // Enricher chain: positive cache over negative cache over failure
        // observer over retrier over the platform client.
        let cf = Arc::new(CfClient::new(self.conf.cf.clone(), &user_agent)?);
        let retrier = Retrier::new(Arc::clone(&cf));
        let observer: crate::enricher::FailureObserver = {
            let stats = stats.clone();
            Box::new(move |err| {
                if err.is_some() {
                    stats.inc(Counter::CfFail, 1);
                }
            })
        };
        let callback = CfCallback::new(retrier, observer);
        let negative = Arc::new(NegativeCache::new(callback));
        let cache = Arc::new(MetadataCache::new(Arc::clone(&negative)));

        // Initial warmup; failure is logged, not fatal.
        info!("warming up metadata cache");
        let start = Instant::now();
        match cf.running_app_metadata().await {
            Ok(apps) => {
                cache.warmup(&apps);
                info!(apps = apps.len(), elapsed = ?start.elapsed(), "warmed up metadata cache");
            }
            Err(err) => warn!(%err, "failed to warm up metadata cache"),
        }

        let reader = Arc::new(KafkaReader::new(&self.conf.kafka)?);

        self.spawn_cache_loops(cache.clone(), negative.clone(), cf.clone());

        // Output chain: batcher over committer over retrier over the sink.
        info!(database = %self.conf.influxdb.database, "configured InfluxDB");
        let influx = InfluxDb::new(self.conf.influxdb.clone(), &user_agent)?;
        if let Err(err) = influx.ping(self.conf.influxdb.ping_timeout).await {
            error!(%err, "InfluxDB server is not up");
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Err(err);
        }
        let out_retrier = output::Retrier::new(influx);
        let commit: crate::output::CommitCallback = {
            let reader = reader.clone();
            let stats = stats.clone();
            Box::new(move |envs| {
                // Offsets advance in arrival order: at-least-once per partition.
                for env in envs {
                    if let Some(pos) = &env.source {
                        reader.commit(pos)?;
                    }
                }
                stats.inc(Counter::Write, envs.len() as u64);
                Ok(())
            })
        };
        let committer = Committer::new(out_retrier, commit);
        let batcher = Batcher::new(committer, self.conf.batcher.clone());

        tokio::spawn(trap_signals(reader.clone()));

        info!("started processing");
        let result = tokio::select! {
            res = process(reader.as_ref(), cache.as_ref(), &batcher, stats.as_ref()) => res,
            res = server => {
                warn!("debug server exited");
                res.map_err(Error::Io)
            }
        };

        match result {
            // Closing the input is the clean shutdown path. Drain what the
            // batcher still holds so already-enriched events are not lost.
            Err(Error::InputClosed) => {
                info!("finished processing");
                if let Err(err) = batcher.flush().await {
                    error!(%err, "failed to flush pending batch on shutdown");
                    return Err(err);
                }
                Ok(())
            }
            Err(err) => {
                error!(%err, "pipeline failed");
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }

    fn spawn_cache_loops<E1, E2>(
        &self,
        cache: Arc<MetadataCache<E1>>,
        negative: Arc<NegativeCache<E2>>,
        cf: Arc<CfClient>,
    ) where
        E1: Enricher + 'static,
        E2: Enricher + 'static,
    {
        let timings = &self.conf.timings;
        let (expire_check, expire) = (timings.metadata_expire_check, timings.metadata_expire);
        let (negative_check, negative_expire) = (
            timings.negative_cache_expire_check,
            timings.negative_cache_expire,
        );
        let refresh = timings.metadata_refresh;

        tokio::spawn({
            let cache = cache.clone();
            async move {
                let mut tick = tokio::time::interval(expire_check);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let start = Instant::now();
                    cache.expire(expire);
                    info!(elapsed = ?start.elapsed(), entries = cache.len(), "expired metadata cache");
                }
            }
        });

        tokio::spawn({
            let negative = negative.clone();
            async move {
                let mut tick = tokio::time::interval(negative_check);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let start = Instant::now();
                    negative.expire(negative_expire);
                    info!(elapsed = ?start.elapsed(), entries = negative.len(), "expired negative cache");
                }
            }
        });

        tokio::spawn(async move {
            // ±10% jitter so multiple instances don't refresh in lockstep
            let period = jittered(refresh, rand::random::<f64>());
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                info!("refreshing metadata cache");
                let start = Instant::now();
                match cf.running_app_metadata().await {
                    Ok(apps) => {
                        cache.warmup(&apps);
                        negative.warmup(&apps);
                        info!(apps = apps.len(), elapsed = ?start.elapsed(), "refreshed metadata and negative cache");
                    }
                    Err(err) => warn!(%err, "failed to refresh metadata and negative cache"),
                }
            }
        });
    }
}

/// The hot loop: read, enrich, hand to the output stack. Read and write
/// errors are fatal; enrichment failures only skip the message.
pub(crate) async fn process<R, E, W>(
    reader: &R,
    enricher: &E,
    writer: &W,
    stats: &Stats,
) -> Result<(), Error>
where
    R: Reader + ?Sized,
    E: Enricher + ?Sized,
    W: AsyncWriter + ?Sized,
{
    loop {
        let mut env = reader.read().await?;
        stats.inc(Counter::Consume, 1);

        if let Err(err) = env.enrich(enricher).await {
            match err {
                // Expected for apps that are gone or events without an app
                // GUID; logging each one would just be spam.
                Error::AppNotFound(_) | Error::NoAppGuid => {}
                err => warn!(%err, meta = ?env.meta, "failed to enrich envelope"),
            }
            stats.inc(Counter::EnrichFail, 1);
            continue;
        }
        stats.inc(Counter::Enrich, 1);

        // Retry logic lives in the output chain: an error here means the
        // output is in an undefined state and the only option is to abort.
        writer.write_async(vec![env]).await?;
        stats.inc(Counter::WriteAsync, 1);
    }
}

/// Applies a uniform ±10% jitter to the refresh period; `random` is a sample
/// from [0, 1).
fn jittered(period: Duration, random: f64) -> Duration {
    let jitter = period.as_secs_f64() * (random - 0.5) / 5.0;
    Duration::from_secs_f64((period.as_secs_f64() + jitter).max(1.0))
}

async fn per_sec_loop(stats: Arc<Stats>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await;
    loop {
        tick.tick().await;
        stats.tick_per_sec();
    }
}

async fn stats_emit_loop(stats: Arc<Stats>) {
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    tick.tick().await;
    loop {
        tick.tick().await;
        match stats.json() {
            Ok(snapshot) => info!(stats = %snapshot, "stats"),
            Err(err) => error!(%err, "failed to serialize stats"),
        }
    }
}

/// Waits for SIGINT/SIGTERM and closes the input; the hot loop then exits
/// once `read` returns `InputClosed`.
async fn trap_signals(reader: Arc<KafkaReader>) {
    let terminated = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(err) => {
                    error!(%err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminated => {}
    }

    info!("signal caught, closing input");
    reader.close();
}
