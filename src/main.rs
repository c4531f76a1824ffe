//! Race Sync Demo
//!
//! Hosts a session on the in-process loopback runtime, joins a second
//! participant, and runs one race with both drivers at full throttle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use race_sync::{
    game::{finish::leaderboard_lines, input::InputFrame, track::Track},
    network::loopback::LoopbackHub,
    LobbyRoster, NetworkSession, RaceConfig, RaceSystem, DEFAULT_TICK_RATE, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = RaceConfig::from_env();
    info!("Race Sync v{}", VERSION);
    info!(
        "Tick Rate: {} Hz (default {}), countdown {}s",
        config.tick_rate, DEFAULT_TICK_RATE, config.countdown_seconds
    );

    demo_race(config).await
}

/// Two participants, one straight, full throttle.
async fn demo_race(config: RaceConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Race ===");

    let hub = LoopbackHub::default();
    let host = NetworkSession::new(Arc::new(hub.runtime()));
    let guest = NetworkSession::new(Arc::new(hub.runtime()));

    // Attach before starting so no join is missed
    let roster = LobbyRoster::attach(&host);
    let _guest_roster = LobbyRoster::attach(&guest);

    host.start_session("demo", "Ann").await.context("host failed to start")?;
    guest.start_session("demo", "Bob").await.context("guest failed to join")?;

    // Give avatar names a moment to resolve
    let mut players = roster.watch();
    let _ = tokio::time::timeout(
        Duration::from_secs(1),
        players.wait_for(|p| p.len() == 2 && p.iter().all(|e| !e.name.is_empty())),
    )
    .await;
    for entry in roster.players() {
        info!("Player {} ({})", entry.name, hex::encode(&entry.id.0[..4]));
    }

    let track = Track::straight(30.0, 4);
    let host_race = RaceSystem::new(&host, config.clone(), track.clone());
    let guest_race = RaceSystem::new(&guest, config, track);

    let mut countdown = host_race.subscribe_countdown();
    tokio::spawn(async move {
        while let Ok(event) = countdown.recv().await {
            info!("Countdown: {:?}", event);
        }
    });

    host.runtime().provide_input(InputFrame::from_analog(1.0, 0.0));
    guest.runtime().provide_input(InputFrame::from_analog(1.0, 0.05));

    let names = roster.names();
    let (host_results, guest_results) = tokio::time::timeout(
        Duration::from_secs(60),
        async { tokio::join!(host_race.run(&names), guest_race.run(&names)) },
    )
    .await
    .context("race did not finish in time")?;
    let results = host_results.context("host race failed")?;
    let mirrored = guest_results.context("guest race failed")?;

    info!("=== Race Results ===");
    for line in leaderboard_lines(&results, &names) {
        info!("{}", line);
    }

    if results == mirrored {
        info!("RESULTS CONSISTENT: guest mirror matches host");
    } else {
        info!("RESULTS DIVERGED: guest mirror differs from host");
    }

    guest.shutdown().await;
    host.shutdown().await;
    Ok(())
}
