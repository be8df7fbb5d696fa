use anyhow::{bail, Context, Result};
use busstop_alert::channel::connect_ws;
use busstop_alert::config::{load_config, new_shared_preferences, AlertConfig, PreferenceStore};
use busstop_alert::dashboard::console::CONSOLE_HELP;
use busstop_alert::dashboard::{
    parse_console_line, BellOutput, Dashboard, DashboardCommand, LoggingSurface,
};
use busstop_alert::kiosk::{Kiosk, KioskCommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "busstop_alert=info".into()),
        )
        .init();

    info!("Bus-stop alert client starting...");

    // Read configuration from environment
    let role = std::env::var("ALERT_ROLE").unwrap_or_else(|_| "kiosk".to_string());
    let config = match std::env::var("ALERT_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => {
            info!("ALERT_CONFIG not set, using defaults");
            AlertConfig::default()
        }
    };

    info!(role = %role, "Configuration loaded");

    match role.as_str() {
        "kiosk" => run_kiosk(config).await,
        "dashboard" => run_dashboard(config).await,
        other => bail!("ALERT_ROLE must be 'kiosk' or 'dashboard', got '{}'", other),
    }
}

async fn run_kiosk(config: AlertConfig) -> Result<()> {
    let (channel, inbound_rx) = connect_ws(config.kiosk.channel.clone());
    let kiosk = Kiosk::new(&config.kiosk, channel);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    info!(
        device_id = %config.kiosk.device_id,
        "Press Enter to send an emergency alert, Ctrl+C to quit"
    );

    // Each line on stdin is a button press
    let button_tx = commands_tx.clone();
    let button = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(_)) => {
                    if button_tx.send(KioskCommand::PressEmergency).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read button input");
                    break;
                }
            }
        }
    });

    let kiosk_handle = tokio::spawn(kiosk.run(inbound_rx, commands_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    button.abort();
    let _ = commands_tx.send(KioskCommand::Shutdown);
    kiosk_handle.await.context("Kiosk task failed")?;
    info!("Kiosk stopped");

    Ok(())
}

async fn run_dashboard(config: AlertConfig) -> Result<()> {
    let settings = config.dashboard;
    let preference_store = PreferenceStore::new(&settings.preferences_path);
    let preferences = new_shared_preferences(preference_store.load());

    let (dashboard, commands_rx) = Dashboard::new(
        &settings,
        preferences,
        Box::new(LoggingSurface),
        Arc::new(BellOutput),
    );
    let mut dashboard = dashboard.with_preference_store(preference_store);
    dashboard.load_stops().await;

    let (channel, inbound_rx) = connect_ws(settings.channel.clone());
    let commands_tx = dashboard.commands();
    let mut dashboard_handle = tokio::spawn(dashboard.run(channel, inbound_rx, commands_rx));

    info!("{}", CONSOLE_HELP);

    // Operator console on stdin
    let console_tx = commands_tx.clone();
    let console = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_console_line(&line) {
                    Ok(command) => {
                        if console_tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "{}", CONSOLE_HELP),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
    });

    // Wait for shutdown signal or a "quit" from the console
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl_c signal")?;
            info!("Shutdown signal received");
            let _ = commands_tx.send(DashboardCommand::Shutdown);
            dashboard_handle.await.context("Dashboard task failed")?;
        }
        result = &mut dashboard_handle => {
            result.context("Dashboard task failed")?;
        }
    }

    console.abort();
    info!("Dashboard stopped");

    Ok(())
}
