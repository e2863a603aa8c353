//! Royale Match Server - headless match driver
//!
//! Runs one or more battle royale matches populated with bots on a fixed
//! tick loop and logs a JSON summary as each match finishes:
//! - Match lifecycle from lobby to results
//! - Multi-phase storm with damage routed through the player directory
//! - Graceful shutdown aborts running matches

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use royale_match_server::config::Config;
use royale_match_server::game::{MatchPhase, MatchRegistry, MatchSession, PlayerDirectory};
use royale_match_server::sim::BotDriver;
use royale_match_server::util::time::{init_server_time, uptime_secs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    let settings = config.match_settings()?;
    let schedule = config.storm_schedule()?;
    let base_seed = config.match_seed.unwrap_or_else(rand::random);

    info!(
        mode = %config.game_mode,
        matches = config.match_count,
        bots = config.bot_count,
        tick_rate = config.tick_rate,
        seed = base_seed,
        "Starting Royale Match Server"
    );

    let registry = Arc::new(MatchRegistry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut matches = JoinSet::new();

    for index in 0..config.match_count {
        let session = Arc::new(MatchSession::new(config.storm_settings(), config.max_health));
        if let Some(phases) = &schedule {
            session.safezone().set_storm_phases(phases.clone());
        }

        let mut bots = BotDriver::new(base_seed.wrapping_add(index as u64), config.map_radius);
        bots.set_friendly_fire(settings.friendly_fire_enabled);
        let team_size = if settings.teams_enabled { settings.team_size } else { 1 };
        let bot_ids = bots.populate(&session, config.bot_count, team_size);

        register_broadcast(&session);

        let engine = session.engine();
        engine.start_match(settings.clone())?;
        for id in &bot_ids {
            engine.player_join_lobby(*id)?;
            engine.player_ready_up(*id, true)?;
        }
        if engine.phase() == MatchPhase::Lobby {
            warn!(
                match_id = %session.id(),
                bots = bot_ids.len(),
                needed = settings.min_players_to_start,
                "Not enough bots to meet the start quorum, forcing start"
            );
            engine.force_start();
        }

        registry.insert(session.clone());
        matches.spawn(
            session
                .clone()
                .run(config.tick_rate, shutdown_rx.clone(), move |s, dt| {
                    bots.step(s, dt);
                }),
        );
    }

    info!(
        active = registry.active_matches(),
        players = registry.total_players(),
        "Matches running"
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    while let Some(joined) = matches.join_next().await {
        match joined {
            Ok(summary) => {
                registry.remove(&summary.match_id);
                match serde_json::to_string(&summary) {
                    Ok(json) => info!(
                        match_id = %summary.match_id,
                        phase = summary.phase.as_str(),
                        winner = ?summary.winner,
                        summary = %json,
                        "Match summary"
                    ),
                    Err(e) => error!(match_id = %summary.match_id, error = %e, "Failed to encode match summary"),
                }
            }
            Err(e) => error!(error = %e, "Match task failed"),
        }
    }

    info!(uptime_secs = uptime_secs(), "Server shutdown complete");
    Ok(())
}

/// Stand-in for network broadcast: announce the headline events
fn register_broadcast(session: &Arc<MatchSession>) {
    let match_id = session.id();
    let directory = session.directory().clone();
    session
        .engine()
        .on_player_eliminated_event("broadcast", move |player, placement| {
            info!(
                match_id = %match_id,
                player_id = %player,
                placement,
                remaining = directory.alive_player_count(),
                "Elimination feed"
            );
            Ok(())
        });
    session.engine().on_countdown("broadcast", move |seconds| {
        info!(match_id = %match_id, seconds, "Match starts in");
        Ok(())
    });
    session
        .safezone()
        .on_storm_warning("broadcast", move |phase_index, seconds| {
            info!(match_id = %match_id, phase_index, seconds, "Storm closing soon");
            Ok(())
        });
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, aborting running matches");
        }
        _ = terminate => {
            info!("Received terminate signal, aborting running matches");
        }
    }
}
