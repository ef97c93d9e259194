//! Statebot - achievement tracking bot on a local console
//!
//! Wires the SQLite store, alarm scheduler, dispatch engine and poller
//! around the achievement bot, then runs until Ctrl-C.

use statebot::achievements::AchievementBot;
use statebot::config::BotConfig;
use statebot::console::ConsoleTransport;
use statebot::db::Database;
use statebot::event::User;
use statebot::poller::Poller;
use statebot::runtime::{Dispatcher, ProductionEngine};
use statebot::scheduler::AlarmScheduler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOCAL_USER_ID: u64 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statebot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BotConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let name = std::env::var("USER").unwrap_or_else(|_| "friend".to_string());
    let transport = Arc::new(ConsoleTransport::stdio(User::new(LOCAL_USER_ID, name)));
    let scheduler = Arc::new(AlarmScheduler::new(config.scheduler()));
    let bot = Arc::new(AchievementBot::with_dialog_timeout(config.dialog_timeout));

    let engine: Arc<ProductionEngine<AchievementBot, _>> = Arc::new(ProductionEngine::new(
        bot,
        db,
        Arc::clone(&transport),
        Arc::clone(&scheduler),
        config.cache_capacity,
    ));

    // Alarms must be re-armed before anything can fire
    let loaded = engine.load_sessions().await?;
    tracing::info!(sessions = loaded, pending_alarms = scheduler.pending(), "Sessions loaded");

    let dispatcher: Arc<dyn Dispatcher> = engine;
    let cancel = CancellationToken::new();

    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(
        Arc::clone(&dispatcher),
        cancel.clone(),
    ));
    let poller = Poller::new(transport, dispatcher, config.poll_period);
    let poller_task = tokio::spawn(poller.run(cancel.clone()));

    tracing::info!("Statebot running, type /start");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    cancel.cancel();
    let (scheduler_result, poller_result) = tokio::join!(scheduler_task, poller_task);
    scheduler_result?;
    poller_result?;

    Ok(())
}
