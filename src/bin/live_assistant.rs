//! Live Voice Assistant
//!
//! Streams the microphone to the live speech service and plays its answers.
//! Press Ctrl+C to end the session.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_voice_session::{
    audio::device::list_devices,
    config::AppConfig,
    network::LiveConnector,
    session::{CpalBackend, SessionManager, SessionState},
    ui::WebServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Live Voice Assistant");

    // Optional config path as the first argument
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load_from(&path)?,
        None => AppConfig::load()?,
    };

    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();

    let session = Arc::new(SessionManager::new(
        &config,
        Arc::new(CpalBackend::new(&config.audio)),
        Arc::new(LiveConnector::new()),
    ));

    if config.ui.enabled {
        let _web_handle = WebServer::new(config.ui.clone(), session.clone()).start_background();
    }

    // Log every state change
    let mut transitions = session.subscribe();
    tokio::spawn(async move {
        while let Ok(state) = transitions.recv().await {
            tracing::info!("Session is now {}", state);
        }
    });

    if let Err(e) = session.start().await {
        tracing::error!("{}", e.user_reason());
        if !config.ui.enabled {
            return Err(e.into());
        }
        tracing::info!("Running in UI-only mode. Start a session via the control API.");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                let status = session.status();
                if status.state == SessionState::Streaming {
                    tracing::info!(
                        "Level {:.0}, {} frames captured, {} sent ({} dropped), {} chunks played, {} interruptions",
                        status.level,
                        status.frames_captured,
                        status.frames_sent,
                        status.frames_dropped,
                        status.chunks_scheduled,
                        status.interruptions
                    );
                } else if !config.ui.enabled {
                    // Nothing left to drive without a control surface
                    break;
                }
            }
        }
    }

    tracing::info!("Shutting down");
    session.stop().await;
    Ok(())
}
