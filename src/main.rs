use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, signal, sync::mpsc, time};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use greenhouse_bridge::{
    api::{self, AppState},
    bridge::Bridge,
    config::Config,
    mqtt::MqttSession,
    notify::{FcmNotifier, LogNotifier, Notifier},
    records::RecordBuilder,
    store::{MemoryStore, PgStore, Store},
    topics::Topics,
};

/// Inbound messages buffered between the event loop and the router.
const INBOUND_CAPACITY: usize = 64;
/// How long shutdown waits for the event loop to flush the disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; real deployments set env vars directly
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        broker = %config.broker,
        client_id = %config.client_id,
        topic_root = %config.topic_root,
        auto_control = config.auto_control,
        "Configuration loaded"
    );

    // Persistence
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url).await?;
            pg.run_migrations().await?;
            info!("Database ready");
            Arc::new(pg)
        }
        None => {
            warn!(
                history_cap = greenhouse_bridge::store::memory::DEFAULT_HISTORY_CAP,
                "DATABASE_URL not set; using in-memory store (data is lost on exit)"
            );
            Arc::new(MemoryStore::new())
        }
    };

    // Push notifications
    let notifier: Arc<dyn Notifier> = match (&config.fcm_project_id, &config.fcm_access_token) {
        (Some(project), Some(token)) => {
            info!(project = %project, "FCM notifications enabled");
            Arc::new(FcmNotifier::new(project.clone(), token.clone(), store.clone()))
        }
        _ => {
            warn!("FCM_PROJECT_ID / FCM_ACCESS_TOKEN not set; alerts are logged only");
            Arc::new(LogNotifier)
        }
    };

    // MQTT transport
    let topics = Topics::new(&config.topic_root);
    let (session, eventloop) = MqttSession::new(&config, topics.clone());
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let mut event_loop = session.spawn_event_loop(eventloop, tx);

    // Router
    let bridge = Arc::new(Bridge::new(
        store.clone(),
        Arc::new(session.clone()),
        notifier,
        topics,
        RecordBuilder::new(config.thresholds),
        config.auto_control,
    ));
    let router_task = tokio::spawn(bridge.run(rx));

    // Status API
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    let state = AppState { store, link: Arc::new(session.clone()) };
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Announce offline and let the event loop send the disconnect. Its exit
    // drops the inbound sender, which in turn stops the router.
    session.shutdown().await;
    match time::timeout(DISCONNECT_GRACE, &mut event_loop).await {
        Ok(Ok(())) => info!("MQTT session closed"),
        Ok(Err(e)) => error!(error = %e, "MQTT event loop task failed"),
        Err(_) => {
            warn!("MQTT event loop did not stop in time; aborting");
            event_loop.abort();
        }
    }
    if let Err(e) = router_task.await {
        error!(error = %e, "Router task failed");
    }

    info!("Bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
