//! Lock demos run against an in-process store

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use topolock_common::{Context, ErrorKind, TopoError};
use topolock_lock::{Contention, LockConfig, LockConn, TopoServer};
use topolock_store::MemoryStore;

use crate::shutdown::cancel_on_signal;

/// Each server gets its own session, as separate processes would
fn connect(store: &MemoryStore, config: &LockConfig) -> TopoServer {
    TopoServer::with_config(Arc::new(store.connect()), config.clone())
}

/// Per-worker outcome of a contention run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub worker: usize,
    pub rounds: usize,
    pub waited: Duration,
}

/// Several workers take the same lock in turn
pub async fn contend(
    store: &MemoryStore,
    config: &LockConfig,
    dir: &str,
    workers: usize,
    rounds: usize,
    hold: Duration,
) -> anyhow::Result<Vec<WorkerReport>> {
    let started = Instant::now();
    let mut tasks = JoinSet::new();

    for worker in 0..workers {
        let server = connect(store, config);
        let dir = dir.to_string();
        tasks.spawn(async move {
            let ctx = Context::background();
            let mut waited = Duration::ZERO;
            for round in 0..rounds {
                let requested = Instant::now();
                let lock = server
                    .lock(&ctx, &dir, &format!("worker-{worker} round-{round}"))
                    .await?;
                waited += requested.elapsed();
                info!(worker, round, node = %lock.path(), "Holding lock");
                tokio::time::sleep(hold).await;
                lock.unlock(&ctx).await?;
            }
            Ok::<_, TopoError>(WorkerReport {
                worker,
                rounds,
                waited,
            })
        });
    }

    let mut reports = Vec::with_capacity(workers);
    while let Some(joined) = tasks.join_next().await {
        reports.push(joined??);
    }
    reports.sort_by_key(|report| report.worker);

    for report in &reports {
        println!(
            "worker-{}: {} rounds, waited {:?}",
            report.worker, report.rounds, report.waited
        );
    }
    println!("{} workers finished in {:?}", workers, started.elapsed());
    Ok(reports)
}

/// A second session is refused by try-lock while the first holds the lock
///
/// Returns whether the refusal was observed.
pub async fn try_lock(store: &MemoryStore, config: &LockConfig, dir: &str) -> anyhow::Result<bool> {
    let ctx = Context::background();
    let holder = connect(store, config);
    let contender = connect(store, config);

    let held = holder.lock(&ctx, dir, "held by first session").await?;
    println!("first session holds {}", held.path());

    let refused = match contender.try_lock(&ctx, dir, "second session").await {
        Err(err) if err.is_kind(ErrorKind::AlreadyLocked) => {
            println!("try-lock refused: {}", err);
            if let Contention::Holder { path, contents } = contender.contention(&ctx, dir).await {
                println!("current holder {}: {}", path, contents);
            }
            true
        }
        Err(err) => return Err(err.into()),
        Ok(lock) => {
            warn!(node = %lock.path(), "try-lock was granted while the lock was held");
            lock.unlock(&ctx).await?;
            false
        }
    };

    held.unlock(&ctx).await?;

    let lock = contender.try_lock(&ctx, dir, "second session").await?;
    println!("try-lock granted after release: {}", lock.path());
    lock.unlock(&ctx).await?;
    Ok(refused)
}

/// Wait behind a holder until the lock frees up, the timeout passes, or a
/// signal cancels the wait
///
/// Returns the error kind when the wait was abandoned.
pub async fn wait(
    store: &MemoryStore,
    config: &LockConfig,
    dir: &str,
    hold: Duration,
    timeout: Duration,
) -> anyhow::Result<Option<ErrorKind>> {
    let ctx = Context::background();
    let holder = connect(store, config);
    let waiter = connect(store, config);

    let held = holder.lock(&ctx, dir, "long running operation").await?;
    println!("holder took {} for {:?}", held.path(), hold);
    let release = tokio::spawn(async move {
        tokio::time::sleep(hold).await;
        held.unlock(&Context::background()).await
    });

    let wait_ctx = cancel_on_signal(&ctx.with_timeout(timeout));
    let outcome = match waiter.lock(&wait_ctx, dir, "waiting operator").await {
        Ok(lock) => {
            println!("acquired {}", lock.path());
            lock.unlock(&ctx).await?;
            None
        }
        Err(err) => {
            println!("gave up waiting ({}): {}", err.kind(), err);
            Some(err.kind())
        }
    };

    release.await??;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LockConfig {
        LockConfig::default()
            .with_root("/topolock")
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_contend_runs_every_round() {
        let store = MemoryStore::new();
        let reports = contend(&store, &test_config(), "demo", 3, 2, Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.rounds == 2));
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_try_lock_is_refused_while_held() {
        let store = MemoryStore::new();
        assert!(try_lock(&store, &test_config(), "demo").await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_times_out_behind_holder() {
        let store = MemoryStore::new();
        let outcome = wait(
            &store,
            &test_config(),
            "demo",
            Duration::from_millis(300),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(outcome, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_wait_acquires_after_release() {
        let store = MemoryStore::new();
        let outcome = wait(
            &store,
            &test_config(),
            "demo",
            Duration::from_millis(20),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(outcome, None);
    }
}
