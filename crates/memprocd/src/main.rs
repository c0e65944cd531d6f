//! memprocd - Memory Processor startup supervisor.
//!
//! Waits for Postgres to accept connections, provisions the current and
//! next year's history partitions, then runs one independent scheduler
//! loop per block kind plus the Statistical Block's hourly pruning pass
//! (spec.md §4.1, §5).

mod db;
mod repositories;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tokio::time::sleep;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use memproc_core::blocks::statistical::prune_all_hourly;
use memproc_core::expression::ExpressionCache;
use memproc_core::scheduler::{Block, BlockScheduler};
use memproc_core::value_store::ValueStoreGateway;
use memproc_core::value_store::redis_store::RedisValueStore;
use memproc_core::window::WindowBuffer;
use memproc_core::window::sqlx_buffer::SqlxWindowBuffer;
use memproc_core::MemprocError;

/// Memory Processor startup supervisor.
#[derive(Parser)]
#[command(name = "memprocd", about = "Memory Processor block scheduler daemon", version)]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis connection string (Value Store Gateway backend).
    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    /// Seconds between reloading each block kind's configuration from
    /// the database (new/edited/deleted blocks take effect on the next
    /// reload, not mid-cycle).
    #[arg(long, default_value = "60")]
    config_reload_seconds: u64,

    /// Number of DB-readiness probe attempts at startup.
    #[arg(long, default_value = "30")]
    db_ready_retries: u32,

    /// Seconds between DB-readiness probe attempts.
    #[arg(long, default_value = "2")]
    db_ready_interval_seconds: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("memprocd={level}").parse().unwrap())
        .add_directive(format!("memproc_core={level}").parse().unwrap());

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Runs `scheduler` for `duration`, ticking once a second, then returns
/// it to the caller so its configuration can be reloaded.
async fn run_scheduler_for<B: Block>(mut scheduler: BlockScheduler<B>, duration: Duration, running: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline && running.load(Ordering::SeqCst) {
        let now = chrono::Utc::now().timestamp();
        scheduler.tick_once(now).await;
        sleep(Duration::from_secs(1)).await;
    }
}

/// Drives one block kind forever: load its current configuration, run it
/// for `reload_interval`, then reload and run again. A load failure is
/// logged and retried after `reload_interval` rather than crashing the
/// process, matching the scheduler's own "log and continue" posture
/// (spec.md §5).
async fn run_kind_loop<B, L, F>(kind: &'static str, reload_interval: Duration, running: Arc<AtomicBool>, mut load: L)
where
    B: Block,
    L: FnMut() -> F,
    F: Future<Output = Result<Vec<B>, MemprocError>>,
{
    while running.load(Ordering::SeqCst) {
        match load().await {
            Ok(blocks) => {
                info!(kind, count = blocks.len(), "loaded blocks");
                let scheduler = BlockScheduler::new(kind, blocks);
                run_scheduler_for(scheduler, reload_interval, &running).await;
            }
            Err(err) => {
                error!(kind, %err, "failed to load block configuration, retrying");
                sleep(reload_interval).await;
            }
        }
    }
}

/// Drives the Rate of Change block kind the same way `run_kind_loop` does,
/// plus config-change detection: a block whose configuration hash differs
/// from the value seen on the previous reload has its window cleared
/// before the new scheduler runs (spec.md §4.12: samples are cleared on
/// configuration change).
async fn run_rate_of_change_loop(
    reload_interval: Duration,
    running: Arc<AtomicBool>,
    pool: sqlx::PgPool,
    gateway: Arc<dyn ValueStoreGateway>,
    window: Arc<dyn WindowBuffer>,
) {
    let mut known_hashes: HashMap<uuid::Uuid, u64> = HashMap::new();
    while running.load(Ordering::SeqCst) {
        match repositories::load_rate_of_change_blocks(&pool, gateway.clone(), window.clone()).await {
            Ok(blocks) => {
                for block in &blocks {
                    let hash = block.config_hash();
                    if let Some(&prev_hash) = known_hashes.get(&block.id()) {
                        if prev_hash != hash {
                            info!(block_id = %block.id(), "rate-of-change config changed, clearing window");
                            if let Err(err) = window.clear(block.id()).await {
                                warn!(block_id = %block.id(), %err, "failed to clear rate-of-change window");
                            }
                        }
                    }
                    known_hashes.insert(block.id(), hash);
                }
                let live_ids: std::collections::HashSet<uuid::Uuid> = blocks.iter().map(|b| b.id()).collect();
                known_hashes.retain(|id, _| live_ids.contains(id));

                info!(kind = "rate_of_change", count = blocks.len(), "loaded blocks");
                let scheduler = BlockScheduler::new("rate_of_change", blocks);
                run_scheduler_for(scheduler, reload_interval, &running).await;
            }
            Err(err) => {
                error!(kind = "rate_of_change", %err, "failed to load block configuration, retrying");
                sleep(reload_interval).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("memprocd {} starting", env!("CARGO_PKG_VERSION"));

    let pool = match db::connect_pool(&args.database_url).await {
        Ok(pool) => pool,
        Err(err) => {
            error!(%err, "failed to construct database pool");
            std::process::exit(1);
        }
    };

    if let Err(err) = db::wait_until_ready(
        &pool,
        args.db_ready_retries,
        Duration::from_secs(args.db_ready_interval_seconds),
    )
    .await
    {
        error!(%err, "database never became ready, exiting");
        std::process::exit(1);
    }
    info!("database ready");

    for table in ["point_history", "global_variable_history"] {
        if let Err(err) = db::ensure_history_partitions(&pool, table).await {
            warn!(%err, table, "failed to ensure history partitions");
        }
    }

    let gateway: Arc<dyn ValueStoreGateway> = match RedisValueStore::connect(&args.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(%err, "failed to connect to redis");
            std::process::exit(1);
        }
    };

    let formula_cache = Arc::new(ExpressionCache::new());
    let if_cache = Arc::new(ExpressionCache::new());

    let rate_of_change_window: Arc<dyn WindowBuffer> =
        Arc::new(SqlxWindowBuffer::new(pool.clone(), "rate_of_change_samples"));
    let statistical_window: Arc<dyn WindowBuffer> = Arc::new(SqlxWindowBuffer::new(pool.clone(), "statistical_samples"));

    let pid_repository: Arc<dyn memproc_core::blocks::pid_autotune::PidSessionRepository> =
        Arc::new(repositories::SqlxPidSessionRepository::new(pool.clone()));

    let running = Arc::new(AtomicBool::new(true));
    let shutdown = running.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        shutdown.store(false, Ordering::SeqCst);
    }) {
        warn!(%err, "failed to set Ctrl-C handler");
    }

    let reload_interval = Duration::from_secs(args.config_reload_seconds);

    let mut handles = Vec::new();

    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("timeout", reload_interval, running, || {
                repositories::load_timeout_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("totalizer", reload_interval, running, || {
                repositories::load_totalizer_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let cache = formula_cache.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("formula", reload_interval, running, || {
                repositories::load_formula_blocks(&pool, gateway.clone(), cache.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let cache = if_cache.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("if", reload_interval, running, || {
                repositories::load_if_blocks(&pool, gateway.clone(), cache.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("average", reload_interval, running, || {
                repositories::load_average_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("deadband", reload_interval, running, || {
                repositories::load_deadband_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let window = rate_of_change_window.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_rate_of_change_loop(reload_interval, running, pool, gateway, window).await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let window = statistical_window.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("statistical", reload_interval, running, || {
                repositories::load_statistical_blocks(&pool, gateway.clone(), window.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("write_action", reload_interval, running, || {
                repositories::load_write_action_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("comparison", reload_interval, running, || {
                repositories::load_comparison_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("minmax", reload_interval, running, || {
                repositories::load_minmax_blocks(&pool, gateway.clone())
            })
            .await;
        }));
    }
    {
        let pool = pool.clone();
        let gateway = gateway.clone();
        let repository = pid_repository.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            run_kind_loop("pid_autotune", reload_interval, running, || {
                repositories::load_pid_tuning_sessions(&pool, gateway.clone(), repository.clone())
            })
            .await;
        }));
    }

    // Hourly Statistical Block window pruning (spec.md §4.14), decoupled
    // from any single block's own tick cadence.
    {
        let pool = pool.clone();
        let window = statistical_window.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match sqlx::query("SELECT id, window_size FROM statistical_blocks").fetch_all(&pool).await {
                    Ok(rows) => {
                        use sqlx::Row;
                        let mut sizes: HashMap<uuid::Uuid, usize> = HashMap::new();
                        for row in rows {
                            let id: uuid::Uuid = match row.try_get("id") {
                                Ok(id) => id,
                                Err(err) => {
                                    warn!(%err, "malformed statistical_blocks row, skipping");
                                    continue;
                                }
                            };
                            let size: i32 = row.try_get("window_size").unwrap_or(0);
                            sizes.insert(id, size.max(0) as usize);
                        }
                        if let Err(err) = prune_all_hourly(window.as_ref(), &sizes).await {
                            warn!(%err, "hourly statistical window pruning failed");
                        }
                    }
                    Err(err) => warn!(%err, "failed to list statistical blocks for pruning"),
                }
                sleep(Duration::from_secs(3600)).await;
            }
        }));
    }

    info!("all block schedulers running");

    while running.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(100)).await;
    }

    info!("shutting down, waiting for in-flight ticks to finish");
    for handle in handles {
        handle.abort();
    }
}
