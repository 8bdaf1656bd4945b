#[macro_use]
extern crate log;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use festa_common::{
    audit::{SecurityEvent, SecurityEventKind, Severity},
    crypto::SigningKey,
};
use festa_daemon::{
    config::{DaemonConfig, AUDIT_CHANNEL_CAPACITY, LEDGER_EVENT_CAPACITY, VERSION},
    core::{
        audit::{
            AlertHandler, AlertMonitor, AuditSink, ChatAlertHandler, MailAlertHandler,
            ThresholdRule, WebhookAlertHandler,
        },
        ledger::{Ledger, LedgerConfig, LedgerEvent},
        storage::SledStorage,
        sync::SyncEngine,
        tenant::TenantRouter,
        verifier::OfflineVerifier,
    },
    jobs::{
        handlers::{self, HandlerDeps},
        task::TaskOptions,
        Enqueuer, FleetConfig, JobFleet, MemoryBroker, QueueBroker, RedisBroker, RegistryBuilder,
    },
    providers::{DevIdentityProvider, LogMailer, LogSmsGateway, Mailer, MemoryObjectStore},
    rpc::{self, AppState},
};
use std::{process::exit, sync::Arc, time::Duration};
use tokio::sync::mpsc;

// Exit codes: 0 clean, 1 unrecoverable init failure, 2 config error
const EXIT_INIT: i32 = 1;
const EXIT_CONFIG: i32 = 2;

fn setup_logger(level: log::LevelFilter) -> Result<(), fern::InitError> {
    let colors = fern::colors::ColoredLevelConfig::new()
        .info(fern::colors::Color::Green)
        .debug(fern::colors::Color::Magenta)
        .warn(fern::colors::Color::Yellow)
        .error(fern::colors::Color::Red);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("sled", log::LevelFilter::Warn)
        .level_for("actix_server", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn parse_secret(raw: &Option<String>, name: &str) -> Option<SigningKey> {
    match raw {
        None => None,
        Some(hex) => match SigningKey::from_hex(hex) {
            Ok(key) => Some(key),
            Err(err) => {
                eprintln!("Invalid {}: {}", name, err);
                exit(EXIT_CONFIG);
            }
        },
    }
}

// Fan post-commit ledger events out to the audit sink and the
// notification pipeline. Strictly after the fact: nothing here can
// affect a committed row.
fn spawn_ledger_event_dispatcher(
    mut receiver: mpsc::Receiver<LedgerEvent>,
    audit: AuditSink,
    enqueuer: Enqueuer,
) {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let tx = &event.transaction;
            audit.emit(
                SecurityEvent::new(
                    SecurityEventKind::LedgerMutation,
                    Severity::Info,
                    format!("ledger_{}", tx.get_kind()),
                    "committed",
                    tx.get_created_at(),
                )
                .with_actor(event.actor.clone())
                .with_resource(format!("wallet:{}", tx.get_wallet_id()))
                .with_details(format!(
                    "tx {} amount {} balance_after {}",
                    tx.get_id(),
                    tx.get_amount(),
                    tx.get_balance_after()
                )),
            );

            let notification = serde_json::json!({
                "namespace": event.namespace,
                "transaction_id": tx.get_id(),
                "wallet_id": tx.get_wallet_id(),
                "type": tx.get_kind().to_string(),
                "amount": tx.get_amount(),
            });
            if let Err(err) = enqueuer
                .enqueue(
                    handlers::webhook::KIND,
                    notification,
                    TaskOptions::default(),
                )
                .await
            {
                warn!("Failed to enqueue ledger notification: {:#}", err);
            }
        }
    });
}

// actix-web 4 runs fine under a multi-threaded tokio runtime, and the
// job fleet wants real parallelism for its worker pools
#[tokio::main]
async fn main() {
    // clap exits with status 2 on a malformed command line, matching
    // the config-error exit code
    let config = DaemonConfig::parse();

    let level: log::LevelFilter = match config.log.log_level.parse() {
        Ok(level) => level,
        Err(_) => {
            eprintln!("Invalid log level: {}", config.log.log_level);
            exit(EXIT_CONFIG);
        }
    };
    if let Err(err) = setup_logger(level) {
        eprintln!("Failed to initialize logging: {}", err);
        exit(EXIT_INIT);
    }

    info!("Festa daemon v{} starting", VERSION);

    let ingress_secret = parse_secret(
        &config.security.payment_ingress_secret,
        "payment ingress secret",
    );
    let alert_secret = parse_secret(&config.security.alert_webhook_secret, "alert webhook secret");
    if config.security.alert_webhook_url.is_some() && alert_secret.is_none() {
        eprintln!("An alert webhook URL requires an alert webhook secret");
        exit(EXIT_CONFIG);
    }

    let storage = match SledStorage::open(&config.storage.db_path) {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            error!("Failed to open database at {}: {:#}", config.storage.db_path, err);
            exit(EXIT_INIT);
        }
    };

    let broker: Arc<dyn QueueBroker> = match &config.queue.redis_url {
        Some(url) => match RedisBroker::connect(url).await {
            Ok(broker) => {
                info!("Queue broker connected at {}", url);
                Arc::new(broker)
            }
            Err(err) => {
                error!("Failed to connect queue broker at {}: {:#}", url, err);
                exit(EXIT_INIT);
            }
        },
        None => {
            warn!("No redis URL configured, using the in-memory broker");
            Arc::new(MemoryBroker::new())
        }
    };

    // External collaborator ports; development implementations until
    // real providers are wired through configuration
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer);
    let sms = Arc::new(LogSmsGateway);
    let objects = Arc::new(MemoryObjectStore::new());
    let identity = Arc::new(DevIdentityProvider);

    let mut alert_handlers: Vec<Arc<dyn AlertHandler>> = Vec::new();
    if let (Some(url), Some(secret)) = (&config.security.alert_webhook_url, alert_secret) {
        alert_handlers.push(Arc::new(WebhookAlertHandler::new(url.clone(), secret)));
    }
    if let Some(url) = &config.security.alert_chat_url {
        alert_handlers.push(Arc::new(ChatAlertHandler::new(url.clone())));
    }
    if !config.security.alert_email.is_empty() {
        alert_handlers.push(Arc::new(MailAlertHandler::new(
            mailer.clone(),
            config.security.alert_email.clone(),
        )));
    }

    let monitor = AlertMonitor::new(
        ThresholdRule::defaults(),
        alert_handlers,
        Duration::from_secs(300),
    );
    let (audit, _audit_handle) = AuditSink::start(storage.clone(), Some(monitor), AUDIT_CHANNEL_CAPACITY);

    let (events_tx, events_rx) = mpsc::channel(LEDGER_EVENT_CAPACITY);
    let ledger = Arc::new(Ledger::new(
        events_tx,
        LedgerConfig {
            cancellation_window_secs: config.security.cancellation_window_secs,
        },
    ));

    let verifier = OfflineVerifier::new(config.security.signature_freshness_secs);
    let sync = Arc::new(SyncEngine::new(ledger.clone(), verifier, audit.clone()));

    let mut registry = RegistryBuilder::new();
    handlers::register_builtin(
        &mut registry,
        &HandlerDeps {
            storage: storage.clone(),
            ledger: ledger.clone(),
            sync: sync.clone(),
            mailer: mailer.clone(),
            sms,
            objects,
            audit: audit.clone(),
        },
    );
    let dispatcher = registry.build();

    let enqueuer = Enqueuer::new(broker.clone(), dispatcher.clone());
    spawn_ledger_event_dispatcher(events_rx, audit.clone(), enqueuer.clone());

    let fleet = JobFleet::start(
        broker,
        dispatcher,
        storage.clone(),
        FleetConfig {
            critical_workers: config.queue.critical_workers,
            default_workers: config.queue.default_workers,
            low_workers: config.queue.low_workers,
        },
    );

    let router = Arc::new(TenantRouter::new(storage.clone(), identity, audit.clone()));
    let state = web::Data::new(AppState {
        router,
        ledger,
        sync,
        enqueuer,
        storage: storage.clone(),
        ingress_secret,
    });

    info!("HTTP API listening on {}", config.network.bind_address);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(rpc::configure)
    })
    .bind(&config.network.bind_address);

    let server = match server {
        Ok(server) => server.run(),
        Err(err) => {
            error!("Failed to bind {}: {:#}", config.network.bind_address, err);
            exit(EXIT_INIT);
        }
    };

    // actix installs its own signal handling; run() returns after a
    // graceful shutdown
    if let Err(err) = server.await {
        error!("HTTP server failed: {:#}", err);
    }

    fleet.stop().await;
    if let Err(err) = storage.flush().await {
        error!("Final storage flush failed: {:#}", err);
    }
    info!("Festa daemon stopped");
}
