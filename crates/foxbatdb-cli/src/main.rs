//! FoxbatDB server daemon: parses `--config`, loads configuration, opens
//! the segment pool and recovers every shard, then runs the reactor on the
//! main thread until a shutdown signal arrives.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use foxbatdb_config::{ConfigLoader, MaxMemoryPolicy};
use foxbatdb_engine::DatabaseManager;
use foxbatdb_server::{AofWriter, Reactor};
use foxbatdb_storage::{recover, EvictionPolicy, RecoveryLimits, SegmentPool};

#[derive(Parser)]
#[command(name = "foxbatdb", author, version, about = "FoxbatDB server")]
struct Cli {
    /// Directory to load `foxbat.toml` from and resolve relative paths
    /// against. Defaults to the current working directory.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(dir) = cli.config {
        loader = loader.with_dir(dir);
    }
    let config = loader.load().context("failed to load configuration")?;

    let limits = RecoveryLimits {
        key_max_bytes: config.key_max_bytes,
        val_max_bytes: config.val_max_bytes,
        db_max_num: config.db_max_num,
    };

    let mut pool = SegmentPool::open(&config.db_file_dir, config.db_file_max_size_bytes())
        .context("failed to open segment pool")?;
    let indices = recover(&mut pool, &limits);
    tracing::info!(shards = indices.len(), "recovered segment pool");

    let eviction_policy: fn() -> EvictionPolicy<Bytes> = match config.max_memory_policy {
        MaxMemoryPolicy::NoEviction => || EvictionPolicy::NoEviction,
        MaxMemoryPolicy::AllKeysLru => || EvictionPolicy::Lru(foxbatdb_storage::Lru::new()),
    };

    let manager = DatabaseManager::new(
        config.db_file_dir.clone(),
        pool,
        indices,
        eviction_policy,
        limits,
        config.db_file_max_size_bytes(),
    );

    let aof = AofWriter::new(4096);
    let mut aof_handle = aof.spawn(
        config.aof_log_file_path.clone(),
        Duration::from_millis(config.aof_cron_job_period_ms),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let mut reactor = Reactor::bind(addr, manager, aof).context("failed to bind reactor")?;
    tracing::info!(%addr, "foxbatdb listening");

    let shutdown = reactor.shutdown_handle();
    register_shutdown_signals(shutdown)?;

    reactor.run().context("reactor exited with an error")?;
    aof_handle.shutdown();
    tracing::info!("foxbatdb stopped");
    Ok(())
}

#[cfg(unix)]
fn register_shutdown_signals(flag: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone())
        .context("failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, flag)
        .context("failed to register SIGTERM handler")?;
    Ok(())
}

#[cfg(not(unix))]
fn register_shutdown_signals(_flag: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Result<()> {
    Ok(())
}
