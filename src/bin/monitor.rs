use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prognosis_monitor::anomaly::{AnomalyDetector, DisabledAnomalyDetector, HttpAnomalyDetector};
use prognosis_monitor::config::{fetch_remote_config, MonitorConfig};
use prognosis_monitor::dashboard::DashboardClient;
use prognosis_monitor::escalation::EscalationService;
use prognosis_monitor::metrics_sink::{DisabledMetricsSink, HttpLineSink, MetricsSink};
use prognosis_monitor::monitors::CheckDispatcher;
use prognosis_monitor::notifications::service::NotificationService;
use prognosis_monitor::scheduler::MonitorService;
use prognosis_monitor::session::{build_http_client, SessionManager};
use prognosis_monitor::store::{MemoryStore, PgStore, Stores};
use prognosis_monitor::version::VERSION;
use prognosis_monitor::web::create_axum_router;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // JSON to a daily rotated file, human-readable to stdout.
    let file_appender = rolling::daily(log_dir, "monitor.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Manually check for --version before full parsing to keep the output simple.
    if std::env::args().any(|arg| arg == "--version") {
        println!("Prognosis monitor version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();
    dotenv().ok();

    // Logging needs the configured directory, so a bad config is reported on stderr.
    let config = match MonitorConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load monitor configuration: {e}");
            return Err(e.into());
        }
    };
    init_logging(&config.log_dir);
    info!("Starting prognosis monitor, version: {}", VERSION);

    let client = build_http_client(&config)?;

    let environments = match fetch_remote_config(&client, &config.config_url).await {
        Ok(environments) => Arc::new(environments),
        Err(e) => {
            error!(error = %e, "Failed to load widget configuration.");
            return Err(e.into());
        }
    };

    // --- Store Setup ---
    let stores = match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url).await.map_err(|e| {
                error!(error = %e, "Failed to connect to the database.");
                e
            })?;
            info!("Using PostgreSQL store.");
            Stores::from_shared(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, escalation state is kept in memory.");
            Stores::from_shared(Arc::new(MemoryStore::new()))
        }
    };

    // --- Collaborators ---
    let notifications = Arc::new(NotificationService::from_config(client.clone(), &config));

    let anomaly: Arc<dyn AnomalyDetector> = match config.detector_endpoint.as_deref() {
        Some(endpoint) => Arc::new(HttpAnomalyDetector::new(
            client.clone(),
            endpoint,
            config.anomaly_threshold,
            config.average_threshold,
        )),
        None => {
            info!("No anomaly detector configured.");
            Arc::new(DisabledAnomalyDetector)
        }
    };

    let sink: Arc<dyn MetricsSink> = match config.metrics_sink_url.as_deref() {
        Some(url) => Arc::new(HttpLineSink::new(
            client.clone(),
            url,
            config.metrics_sink_user.as_deref(),
            config.metrics_sink_password.as_deref(),
        )),
        None => {
            info!("No metrics sink configured.");
            Arc::new(DisabledMetricsSink)
        }
    };

    let dispatcher = CheckDispatcher::from_config(&config, &stores, anomaly, sink);
    if let Err(e) = dispatcher.validate(&environments) {
        error!(error = %e, "Widget configuration references an unknown check.");
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // --- HTTP Server ---
    let listener = TcpListener::bind(&config.http_listen).await?;
    info!(address = %config.http_listen, "HTTP server listening.");
    let app = create_axum_router(stores.source_sink.clone());
    let mut http_shutdown = shutdown_rx.clone();
    let http_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP server failed.");
        }
    });

    // --- Monitor Loop ---
    let monitor = MonitorService::new(
        SessionManager::new(client.clone(), environments, &config, notifications.clone()),
        DashboardClient::new(client, &config),
        Arc::new(dispatcher),
        EscalationService::new(
            stores.escalation.clone(),
            notifications.clone(),
            notifications.clone(),
            &config,
        ),
        notifications,
        &config,
        shutdown_rx,
    );
    let monitor_handle = tokio::spawn(monitor.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = shutdown_tx.send(());

    if let Err(e) = monitor_handle.await {
        error!(error = %e, "Monitor loop task failed.");
    }
    if let Err(e) = http_handle.await {
        error!(error = %e, "HTTP server task failed.");
    }
    info!("Prognosis monitor stopped.");
    Ok(())
}
