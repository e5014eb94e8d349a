use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use order_tracker::api::{self, AppState};
use order_tracker::cache::{LruOrderCache, OrderCache};
use order_tracker::config::Config;
use order_tracker::messaging::{DeadLetterSink, KafkaOrderConsumer, KafkaPublisher, OrderMessageHandler};
use order_tracker::metrics::Metrics;
use order_tracker::service::OrderService;
use order_tracker::storage::{OrderStore, PgOrderStore};
use order_tracker::telemetry;

// Multi-threaded: consumer workers and the HTTP server share this runtime.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    telemetry::init_tracing(&config.log_level, config.log_format)
        .context("failed to install tracing subscriber")?;

    tracing::info!(
        topic = %config.consumer.topic,
        group_id = %config.consumer.group_id,
        workers = config.consumer_workers,
        cache_capacity = config.cache_capacity,
        "Starting order_tracker"
    );

    // === 1. Connect to PostgreSQL ===
    let store = PgOrderStore::connect(&config.store)
        .await
        .context("failed to connect to PostgreSQL")?;
    if config.run_migrations {
        store.migrate().await.context("failed to run migrations")?;
    }
    let store: Arc<dyn OrderStore> = Arc::new(store);

    // === 2. Metrics, cache, service ===
    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
    let cache: Arc<dyn OrderCache> = Arc::new(LruOrderCache::new(config.cache_capacity));
    let service = Arc::new(OrderService::new(store, cache, metrics.clone()));

    // Nothing is served until every stored order is cached.
    service.init().await.context("cache warm-up failed")?;

    // === 3. HTTP read API ===
    let state = Arc::new(AppState {
        service: service.clone(),
        metrics: metrics.clone(),
    });
    let server = api::server(state, &config.app_host, config.app_port)
        .with_context(|| format!("failed to bind {}:{}", config.app_host, config.app_port))?;
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // === 4. Consumer workers ===
    let shutdown = CancellationToken::new();
    let handler = Arc::new(OrderMessageHandler::new(service.clone(), metrics.clone()));
    let dead_letters = match &config.dead_letter_topic {
        Some(topic) => Some(DeadLetterSink {
            publisher: Arc::new(
                KafkaPublisher::new(&config.consumer.brokers)
                    .context("failed to create dead-letter producer")?,
            ),
            topic: topic.clone(),
        }),
        None => {
            tracing::warn!("Dead-letter topic disabled, exhausted messages will be dropped");
            None
        }
    };

    let mut workers = JoinSet::new();
    for worker_id in 0..config.consumer_workers {
        let consumer = KafkaOrderConsumer::new(
            worker_id,
            &config.consumer,
            handler.clone(),
            dead_letters.clone(),
            metrics.clone(),
        )
        .with_context(|| format!("failed to start consumer worker {}", worker_id))?;
        workers.spawn(consumer.run(shutdown.child_token()));
    }

    // === 5. Run until Ctrl-C or a worker dies ===
    let mut worker_failed = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
        }
        Some(joined) = workers.join_next() => {
            worker_failed = true;
            match joined {
                Ok(Ok(())) => tracing::error!("Consumer worker exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Consumer worker failed"),
                Err(e) => tracing::error!(error = %e, "Consumer worker panicked"),
            }
        }
    }

    // === 6. Graceful shutdown ===
    shutdown.cancel();
    server_handle.stop(true).await;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                worker_failed = true;
                tracing::error!(error = %e, "Consumer worker failed during shutdown");
            }
            Err(e) => {
                worker_failed = true;
                tracing::error!(error = %e, "Consumer worker panicked");
            }
        }
    }

    if let Ok(Err(e)) = server_task.await {
        tracing::error!(error = %e, "HTTP server error");
    }

    tracing::info!(cached_orders = service.cached_orders(), "order_tracker stopped");

    if worker_failed {
        anyhow::bail!("consumer worker terminated abnormally");
    }
    Ok(())
}
