use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use leasekeep_lock::{BackoffKind, Context, LockConfig, LockError, Locker, RedisBackend};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leasekeep", about = "Obtain, watch and release a Redis lease lock")]
struct Cli {
    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    redis_url: String,

    #[arg(long, default_value = "leasekeep.demo")]
    key: String,

    /// Lease duration; defaults to the configured TTL.
    #[arg(long)]
    ttl_ms: Option<u64>,

    /// none, fixed, linear or exponential.
    #[arg(long)]
    strategy: Option<String>,

    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    max_interval_ms: Option<u64>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long, default_value_t = 3)]
    polls: u32,

    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Gives up obtaining after this long instead of after one lease duration.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON lock configuration. `LEASEKEEP_*` variables are used otherwise.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn lock_config(&self) -> anyhow::Result<LockConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                LockConfig::from_json(&json)?
            }
            None => LockConfig::from_env()?,
        };

        if let Some(ttl_ms) = self.ttl_ms {
            config.default_ttl_ms = ttl_ms;
        }
        if let Some(strategy) = &self.strategy {
            config.retry.strategy = BackoffKind::parse(strategy)?;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.retry.interval_ms = interval_ms;
        }
        if let Some(max_interval_ms) = self.max_interval_ms {
            config.retry.max_interval_ms = max_interval_ms;
        }
        if self.max_attempts.is_some() {
            config.retry.max_attempts = self.max_attempts;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("leasekeep=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = cli.lock_config()?;
    let backend = RedisBackend::connect(&cli.redis_url)
        .await
        .with_context(|| format!("connecting to {}", cli.redis_url))?;
    let locker = Locker::with_config(Arc::new(backend), config)?;

    let (base, cancel) = Context::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            cancel.cancel();
        }
    });
    let obtain_ctx = match cli.timeout_ms {
        Some(timeout_ms) => base.with_timeout(Duration::from_millis(timeout_ms)),
        None => base.clone(),
    };

    let lock = match locker.obtain_default(&cli.key, &obtain_ctx).await {
        Ok(lock) => lock,
        Err(err) if err.is_not_obtained() => {
            println!("could not obtain lock {}", cli.key);
            return Ok(());
        }
        Err(err) if err.is_cancellation() => {
            println!("gave up obtaining lock {}: {err}", cli.key);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    println!("obtained lock {} for {:?}", lock.key(), lock.lease());

    let poll_interval = Duration::from_millis(cli.poll_interval_ms);
    for _ in 0..cli.polls {
        if base.run(tokio::time::sleep(poll_interval)).await.is_err() {
            break;
        }
        match lock.ttl(&base).await {
            Ok(Some(left)) => println!("lock still held, {left:?} left"),
            Ok(None) => {
                println!("lock expired");
                break;
            }
            Err(err) if err.is_cancellation() => break,
            Err(err) => return Err(err.into()),
        }
    }

    // Released even after Ctrl-C; the cancelled context would refuse the call.
    match lock.release(&Context::background()).await {
        Ok(()) => println!("released lock {}", lock.key()),
        Err(LockError::LockLost { key }) => {
            warn!(key = %key, "lease lapsed before release");
            println!("lock {key} was already lost");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
