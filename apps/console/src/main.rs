use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, ClientSettings},
    Acknowledgment, CommandDispatcher, CommandIntent, ConfirmationPolicy,
    GateError, HttpVehicleDirectory, MediaSessionEvent, MediaSessionManager, MediaSessionState,
    ModeOrchestrator, Notification, NotificationHub, NotificationSink, SignalingClient,
};
use media_transport::WebRtcConnector;
use shared::domain::{VehicleCode, VehicleMode};
use tokio::{
    io::{stdin, AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    sync::broadcast,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "console", about = "Operator console for uncrewed surface vehicles")]
struct Args {
    /// Settings file; defaults to ./console.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Operator name recorded on command logs.
    #[arg(long)]
    operator: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the vehicles the fleet API knows about.
    Vehicles,
    Arm {
        vehicle: String,
    },
    Disarm {
        vehicle: String,
    },
    SetMode {
        vehicle: String,
        /// MANUAL, AUTO, LOITER or RTL.
        mode: VehicleMode,
    },
    /// Watch a live feed until interrupted.
    Watch {
        feed: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref()).context("loading settings")?;
    if let Some(operator) = args.operator {
        settings.operator = Some(operator);
    }
    info!(
        "console: api={} gateway={} prefix={}",
        settings.api_base_url, settings.gateway_base_url, settings.gateway_prefix
    );

    let hub = Arc::new(NotificationHub::new());

    match args.command {
        Command::Vehicles => {
            let directory = HttpVehicleDirectory::new(settings.api_base_url.clone());
            let vehicles = directory.list_vehicles().await?;
            if vehicles.is_empty() {
                println!("no vehicles registered");
            }
            for vehicle in vehicles {
                println!("{:<12} {:<24} {:?}", vehicle.code, vehicle.name, vehicle.status);
            }
            Ok(())
        }
        Command::Arm { vehicle } => {
            send_confirmed(&settings, &hub, vehicle, CommandIntent::Arm).await
        }
        Command::Disarm { vehicle } => {
            send_confirmed(&settings, &hub, vehicle, CommandIntent::Disarm).await
        }
        Command::SetMode { vehicle, mode } => {
            send_confirmed(&settings, &hub, vehicle, CommandIntent::SetMode(mode)).await
        }
        Command::Watch { feed } => watch(&settings, &hub, &feed).await,
    }
}

async fn send_confirmed(
    settings: &ClientSettings,
    hub: &Arc<NotificationHub>,
    vehicle: String,
    intent: CommandIntent,
) -> Result<()> {
    let dispatcher = CommandDispatcher::with_timeout(
        settings.api_base_url.clone(),
        settings.command_timeout(),
    )
    .context("building command client")?;
    let orchestrator = ModeOrchestrator::new(
        Arc::new(dispatcher),
        Arc::clone(hub) as Arc<dyn NotificationSink>,
        settings.confirmation_policy(),
        settings.operator_identity(),
    );
    let mut notifications = hub.subscribe();
    let mut input = BufReader::new(stdin()).lines();

    orchestrator
        .select_vehicle(Some(VehicleCode::new(vehicle)))
        .await;
    let pending = orchestrator.request(intent).await?;

    let Some(acknowledgment) =
        read_acknowledgment(orchestrator.policy(), &pending.challenge_phrase(), &mut input).await?
    else {
        orchestrator.cancel().await;
        println!("cancelled; nothing was sent");
        return Ok(());
    };

    let outcome = match orchestrator.confirm(acknowledgment).await {
        Ok(outcome) => outcome,
        Err(GateError::AcknowledgmentRejected) => {
            orchestrator.cancel().await;
            bail!("confirmation did not match; nothing was sent");
        }
        Err(err) => return Err(err.into()),
    };

    drain_notifications(&mut notifications);
    if !outcome.success {
        bail!(outcome.describe());
    }
    Ok(())
}

/// `None` when the operator backs out.
async fn read_acknowledgment<R>(
    policy: &ConfirmationPolicy,
    phrase: &str,
    input: &mut Lines<R>,
) -> Result<Option<Acknowledgment>>
where
    R: AsyncBufRead + Unpin,
{
    match policy {
        ConfirmationPolicy::TypedPhrase => {
            println!("type '{phrase}' to confirm, or an empty line to cancel:");
            match input.next_line().await? {
                Some(line) if !line.trim().is_empty() => Ok(Some(Acknowledgment::TypedPhrase(line))),
                _ => Ok(None),
            }
        }
        ConfirmationPolicy::HoldToConfirm { min_hold } => {
            println!("{}", hold_prompt(phrase, *min_hold));
            if input.next_line().await?.is_none() {
                return Ok(None);
            }
            let started = Instant::now();
            if input.next_line().await?.is_none() {
                return Ok(None);
            }
            Ok(Some(Acknowledgment::Held(started.elapsed())))
        }
    }
}

/// A terminal cannot observe a held key, so the hold is the time between two
/// Enter presses.
fn hold_prompt(phrase: &str, min_hold: Duration) -> String {
    format!(
        "{phrase}: press Enter to start the hold timer, wait at least {}ms, then press Enter again \
         to confirm (the time between the two presses is what counts); end input to cancel",
        min_hold.as_millis()
    )
}

async fn watch(
    settings: &ClientSettings,
    hub: &Arc<NotificationHub>,
    feed: &str,
) -> Result<()> {
    let signaling = SignalingClient::from_settings(settings, Arc::new(WebRtcConnector));
    let manager = MediaSessionManager::new(
        Arc::new(signaling),
        Arc::clone(hub) as Arc<dyn NotificationSink>,
    );
    let mut events = manager.subscribe_events();
    let mut notifications = hub.subscribe();

    manager.connect(feed).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                manager.disconnect().await;
                drain_notifications(&mut notifications);
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(MediaSessionEvent::StateChanged(snapshot)) => {
                    println!("{}: {:?}", snapshot.feed_name, snapshot.state);
                    if snapshot.state == MediaSessionState::Failed {
                        drain_notifications(&mut notifications);
                        let cause = snapshot.last_error.unwrap_or_default();
                        manager.disconnect().await;
                        bail!("live feed {} failed: {cause}", snapshot.feed_name);
                    }
                }
                Ok(MediaSessionEvent::Cleared { feed_name, .. }) => println!("{feed_name}: released"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            notification = notifications.recv() => {
                if let Ok(notification) = notification {
                    print_notification(&notification);
                }
            }
        }
    }
}

fn drain_notifications(notifications: &mut broadcast::Receiver<Notification>) {
    while let Ok(notification) = notifications.try_recv() {
        print_notification(&notification);
    }
}

fn print_notification(notification: &Notification) {
    println!(
        "[{} {}] {}",
        notification.raised_at.format("%H:%M:%S"),
        notification.severity,
        notification.message
    );
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
