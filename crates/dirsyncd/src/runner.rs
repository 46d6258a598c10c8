//! Top-level run loop (SPEC_FULL.md §2): owns one `CookieState` per
//! configured database and spawns one source task per configured
//! remote, each driving its `Source` through `tick` at the scheduler's
//! chosen cadence until shutdown.

use std::sync::Arc;
use std::time::Duration;

use dirsync_core::directory::mock::MockDirectory;
use dirsync_core::schema::PermissiveSchema;
use dirsync_core::{CookieState, DirectoryOps, ShutdownFlag};
use dirsync_node::{Scheduler, Source, TickOutcome};
use dirsync_primitives::ServerId;
use eyre::{Result as EyreResult, WrapErr};
use tracing::{error, info, warn};

use crate::config::{Config, SourceConfig};
use crate::provider::{EmptyChangeLog, UnimplementedProvider};

/// How often a paused task (denied refresh arbitration, or between
/// retries shorter than this) is re-checked.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub async fn run(config: Config) -> EyreResult<()> {
    let shutdown = ShutdownFlag::new();
    spawn_shutdown_listener(shutdown.clone());

    let directory: Arc<dyn DirectoryOps> = Arc::new(MockDirectory::new());
    let scheduler = Arc::new(Scheduler::new());
    let (local_rid, local_sid) = config.sources.first().map_or((0, ServerId::NONE), |source| {
        let sid = ServerId::new(i32::try_from(source.rid).unwrap_or(i32::MAX)).unwrap_or(ServerId::NONE);
        (source.rid, sid)
    });
    let cookie = Arc::new(CookieState::new(local_rid, local_sid, shutdown.clone()));

    let mut handles = Vec::with_capacity(config.sources.len());
    for source_config in config.sources.clone() {
        let directory = Arc::clone(&directory);
        let scheduler = Arc::clone(&scheduler);
        let cookie = Arc::clone(&cookie);
        let shutdown = shutdown.clone();
        let suffix = config.suffix();
        handles.push(tokio::spawn(async move {
            run_source(source_config, suffix, directory, scheduler, cookie, shutdown).await
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await.wrap_err("source task panicked")? {
            error!(error = %err, "source task exited with an error");
        }
    }

    Ok(())
}

fn spawn_shutdown_listener(shutdown: ShutdownFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, signalling shutdown");
            shutdown.set();
        }
    });
}

async fn run_source(
    config: SourceConfig,
    suffix: dirsync_primitives::Dn,
    directory: Arc<dyn DirectoryOps>,
    scheduler: Arc<Scheduler>,
    cookie: Arc<CookieState>,
    shutdown: ShutdownFlag,
) -> EyreResult<()> {
    let sid = ServerId::new(i32::try_from(config.rid).unwrap_or(i32::MAX))
        .wrap_err("source rid must already be validated by Config::load")?;
    let base = dirsync_primitives::Dn::new(config.base_dn.clone());
    let mut source = Source::new(
        config.rid,
        sid,
        base,
        suffix,
        config.mode,
        config.filter.clone(),
        config.retry_schedule(),
        cookie,
        Arc::clone(&scheduler),
    );

    let mut conn = UnimplementedProvider::new(config.provider.clone());
    let schema = PermissiveSchema;
    let log = EmptyChangeLog;
    let task_id = u64::from(config.rid);

    loop {
        if shutdown.is_set() {
            info!(rid = config.rid, "source stopping for shutdown");
            return Ok(());
        }
        if !scheduler.is_running(task_id) {
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            continue;
        }

        let outcome = source
            .tick(&mut conn, &*directory, &schema, Some(&log), || shutdown.is_set())
            .await;

        match outcome {
            TickOutcome::Shutdown => return Ok(()),
            TickOutcome::Error(err) => {
                warn!(rid = config.rid, error = %err, "tick reported an error");
            }
            TickOutcome::Ok | TickOutcome::Repoll | TickOutcome::Busy | TickOutcome::Timeout | TickOutcome::Paused => {}
        }

        let interval = scheduler.interval(task_id).unwrap_or(PAUSE_POLL_INTERVAL);
        tokio::time::sleep(interval).await;
    }
}
