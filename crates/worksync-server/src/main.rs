//! worksyncd entry point.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use worksync_core::{LogFormat, TracingConfig, init_tracing};
use worksync_providers::{ChangeSource, FailingSource, GoogleChangeSource, SourceError};
use worksync_server::{
    AppState, ChangeClassifier, ChangeReconciler, MemoryStore, Principal, RenewScheduler,
    RenewSchedulerConfig, ServerConfig, ServerError, ServerResult, SignalHandler,
    SubscriptionRenewer, new_shared_state, reconcile_queue, router, shared_seen_cache,
    spawn_eviction, spawn_reconcile_worker,
};

#[tokio::main]
async fn main() -> ExitCode {
    let format = if std::env::var("WORKSYNC_LOG_PRETTY").is_ok() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    if let Err(e) = init_tracing(TracingConfig::daemon().with_format(format)) {
        eprintln!("error: failed to initialize tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ServerResult<()> {
    let config = ServerConfig::from_env()?;
    info!(bind = %config.bind_addr, "starting worksyncd");

    let source: Arc<dyn ChangeSource> = match std::env::var("WORKSYNC_ACCESS_TOKEN") {
        Ok(token) => Arc::new(GoogleChangeSource::with_static_token(
            token,
            config.source_timeout,
        )),
        Err(_) => {
            warn!("WORKSYNC_ACCESS_TOKEN is not set, change source calls will fail");
            Arc::new(FailingSource::new(
                "google",
                SourceError::configuration("WORKSYNC_ACCESS_TOKEN is not set"),
            ))
        }
    };

    let store = Arc::new(MemoryStore::with_principals(principals_from_env()));

    let dedup = shared_seen_cache(config.dedup_ttl);
    let trivial = shared_seen_cache(config.trivial_ttl);
    let eviction = spawn_eviction(vec![dedup.clone(), trivial.clone()], config.eviction_interval);

    let classifier = ChangeClassifier::new(dedup, trivial, config.triviality);
    let reconciler = Arc::new(ChangeReconciler::new(
        source.clone(),
        store.clone(),
        classifier,
        config.admin_principal.clone(),
        config.source_timeout,
    ));

    let (jobs, job_rx) = reconcile_queue(config.queue_capacity);
    let worker = spawn_reconcile_worker(job_rx, reconciler);

    let state = new_shared_state();

    let renewer = config.callback_url.as_ref().map(|url| {
        Arc::new(SubscriptionRenewer::new(
            source.clone(),
            store.clone(),
            url.clone(),
            config.renew_pause,
        ))
    });

    let scheduler_task = renewer.clone().map(|renewer| {
        let scheduler =
            RenewScheduler::new(RenewSchedulerConfig::new(config.renew_interval));
        let handle = scheduler.handle();
        let state = state.clone();
        let task = tokio::spawn(async move {
            scheduler
                .run(move || {
                    let renewer = renewer.clone();
                    let state = state.clone();
                    async move {
                        match renewer.renew_all().await {
                            Ok(report) => {
                                let failed = !report.all_succeeded();
                                state.write().await.set_last_renewal(report);
                                if failed {
                                    Err("some channels failed to renew".to_string())
                                } else {
                                    Ok(())
                                }
                            }
                            Err(e) => Err(e.to_string()),
                        }
                    }
                })
                .await;
        });
        (handle, task)
    });
    if scheduler_task.is_none() {
        warn!("WORKSYNC_CALLBACK_URL is not set, channel renewal is disabled");
    }

    let signals = SignalHandler::new();
    signals.spawn_listener();

    let app = AppState {
        jobs,
        store,
        state,
        renewer,
    };
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "webhook listener bound");

    let shutdown = signals.shutdown();
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move {
            shutdown.wait().await;
            info!("shutting down");
        })
        .await
        .map_err(ServerError::Io)?;

    if let Some((handle, task)) = scheduler_task {
        let _ = handle.stop().await;
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }
    eviction.abort();
    drop(worker);

    info!("worksyncd stopped");
    Ok(())
}

/// Principals come from `WORKSYNC_PRINCIPALS`, a comma-separated list of
/// emails. Each principal watches Drive and their primary calendar.
fn principals_from_env() -> Vec<Principal> {
    match std::env::var("WORKSYNC_PRINCIPALS") {
        Ok(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Principal::new)
            .collect(),
        Err(_) => Vec::new(),
    }
}
