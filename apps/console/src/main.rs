mod commands;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use commands::{parse_command, ConsoleCommand, HELP};
use dispatch_client::{
    load_settings, ClientEvent, Collection, DispatchClient, FileSessionStore, FleetTracker,
    FleetUpdate, ReconnectPolicy, SessionContext,
};
use shared::protocol::FleetEvent;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Terminal client for the emergency dispatch backend")]
struct Args {
    /// Backend base URL, e.g. http://127.0.0.1:8000
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    session_file: Option<PathBuf>,
    /// Reconnect attempts after the dispatch channel drops; 0 disables reconnection.
    #[arg(long)]
    reconnect_attempts: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(api_url) = args.api_url {
        settings.api_url = api_url;
    }
    if let Some(session_file) = args.session_file {
        settings.session_file = session_file;
    }
    if let Some(max_attempts) = args.reconnect_attempts {
        settings.reconnect = ReconnectPolicy {
            max_attempts,
            ..settings.reconnect
        };
    }
    info!(api_url = %settings.api_url, "console: starting");

    let store = Arc::new(FileSessionStore::new(settings.session_file.clone()));
    let session = SessionContext::restore(store)
        .await
        .context("failed to restore session")?;
    let client = DispatchClient::new(settings, session.clone());
    let tracker = client.fleet_tracker();

    if let (Some(email), Some(password)) = (args.email.as_deref(), args.password.as_deref()) {
        if let Err(err) = sign_in(&client, email, password).await {
            eprintln!("sign-in failed: {err}");
        }
    } else if session.is_authenticated().await {
        if let Err(err) = client.connect().await {
            eprintln!("could not open dispatch channel: {err}");
        }
    } else {
        println!("not signed in; use `login <email> <password>`");
    }

    let result = run(&client, &tracker).await;
    tracker.stop().await;
    client.shutdown().await;
    result
}

async fn sign_in(client: &Arc<DispatchClient>, email: &str, password: &str) -> Result<()> {
    let login = client.rest().login(email, password).await?;
    println!(
        "signed in as {} ({})",
        login.user.email,
        login.user.role.as_str()
    );
    client.connect().await?;
    Ok(())
}

async fn run(client: &Arc<DispatchClient>, tracker: &FleetTracker) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut events = client.subscribe_events();
    let mut fleet = tracker.subscribe();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ConsoleCommand::Quit) => return Ok(()),
                    Ok(command) => {
                        if let Err(err) = execute(client, tracker, command).await {
                            eprintln!("error: {err:#}");
                        }
                    }
                    Err(message) => eprintln!("{message}"),
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::SessionExpired) => {
                    tracker.stop().await;
                    client.shutdown().await;
                    println!("session expired; sign in again with `login <email> <password>`");
                }
                Ok(event) => render_event(client, &event).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "console: event stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
            update = fleet.recv() => match update {
                Ok(update) => render_fleet(&update),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "console: fleet stream lagged"),
                Err(RecvError::Closed) => {}
            },
        }
    }
}

async fn execute(
    client: &Arc<DispatchClient>,
    tracker: &FleetTracker,
    command: ConsoleCommand,
) -> Result<()> {
    match command {
        ConsoleCommand::Login { email, password } => sign_in(client, &email, &password).await?,
        ConsoleCommand::Show(collection) => print_collection(client, collection).await,
        ConsoleCommand::Refresh(collection) => client.refresh(collection).await?,
        ConsoleCommand::Report {
            incident_type,
            severity_level,
            location,
            description,
        } => {
            client
                .report_incident(incident_type, severity_level, location, description)
                .await?
        }
        ConsoleCommand::CreateVehicle {
            station_id,
            capacity,
            location,
        } => client.create_vehicle(station_id, capacity, location).await?,
        ConsoleCommand::CreateStation {
            station_type,
            zone,
            location,
        } => client.create_station(station_type, zone, location).await?,
        ConsoleCommand::DeleteVehicle(vehicle_id) => client.delete_vehicle(vehicle_id).await?,
        ConsoleCommand::Dispatch {
            incident_id,
            vehicle_id,
        } => {
            let snapshot = client.snapshot().await;
            if snapshot.incident(incident_id).is_none() {
                println!("incident {incident_id} is not in the current list");
            }
            if let Some(vehicle) = snapshot.vehicle(vehicle_id) {
                if !vehicle.status.is_dispatchable() {
                    println!("vehicle {vehicle_id} is {:?}", vehicle.status);
                }
            }
            client.dispatch_incident(incident_id, vehicle_id).await?
        }
        ConsoleCommand::Accept {
            vehicle_id,
            incident_id,
        } => client.accept_assignment(vehicle_id, incident_id).await?,
        ConsoleCommand::Resolve(incident_id) => client.resolve_incident(incident_id).await?,
        ConsoleCommand::Locate {
            vehicle_id,
            location,
        } => client.update_unit_location(vehicle_id, location).await?,
        ConsoleCommand::AssignResponder {
            responder_id,
            vehicle_id,
        } => {
            client
                .assign_responder_to_vehicle(responder_id, vehicle_id)
                .await?
        }
        ConsoleCommand::Analytics => client.request_analytics().await?,
        ConsoleCommand::Read(notification_id) => {
            if !client.mark_notification_read(notification_id).await {
                println!("no notification {notification_id}");
            }
        }
        ConsoleCommand::Track(vehicle_id) => tracker.track(vehicle_id).await?,
        ConsoleCommand::Untrack => tracker.stop().await,
        ConsoleCommand::ChangePassword {
            old_password,
            new_password,
        } => {
            client.rest().check_old_password(&old_password).await?;
            let response = client.rest().change_password(&new_password).await?;
            println!("{}", response.message);
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

async fn print_collection(client: &DispatchClient, collection: Collection) {
    match collection {
        Collection::Incidents => {
            for incident in client.incidents().await {
                println!(
                    "#{:<5} {:<8} {:<9} {:?} vehicles={:?}",
                    incident.incident_id,
                    incident.incident_type.as_str(),
                    format!("{:?}", incident.severity_level),
                    incident.status,
                    incident.assigned_vehicle_ids,
                );
            }
        }
        Collection::Vehicles => {
            for vehicle in client.vehicles().await {
                let kind = vehicle.vehicle_type.map_or("-", |t| t.as_str());
                println!(
                    "#{:<5} {:<8} {:?} station={:?}",
                    vehicle.vehicle_id, kind, vehicle.status, vehicle.station_id,
                );
            }
        }
        Collection::Stations => {
            for station in client.stations().await {
                println!(
                    "#{:<5} {:<8} zone={} vehicles={}",
                    station.station_id,
                    station.station_type.as_str(),
                    station.zone.as_deref().unwrap_or("-"),
                    station.vehicle_count,
                );
            }
        }
        Collection::Notifications => {
            for notification in client.notifications().await {
                let marker = if notification.is_read { ' ' } else { '*' };
                println!(
                    "{marker} #{:<5} {} {}",
                    notification.notification_id, notification.title, notification.body
                );
            }
        }
    }
}

async fn render_event(client: &DispatchClient, event: &ClientEvent) {
    match event {
        ClientEvent::ConnectionStateChanged(state) => println!("[channel] {state}"),
        ClientEvent::CollectionReplaced { collection, len } => {
            println!("[{collection:?}] {len} entries");
            if *collection == Collection::Notifications {
                let unread = client.snapshot().await.unread_notifications();
                println!("[notifications] {unread} unread");
            }
        }
        ClientEvent::RefetchRequested(_) => {}
        ClientEvent::Notice(notice) => println!("[{:?}] {}", notice.severity, notice.message),
        ClientEvent::Acknowledged { message } => {
            println!("[ok] {}", message.as_deref().unwrap_or("done"));
        }
        ClientEvent::Analytics(analytics) => match serde_json::to_string_pretty(analytics) {
            Ok(text) => println!("[analytics]\n{text}"),
            Err(err) => warn!("console: failed to render analytics: {err}"),
        },
        ClientEvent::SessionExpired => {}
    }
}

fn render_fleet(update: &FleetUpdate) {
    match &update.event {
        FleetEvent::VehicleLocationUpdate { vehicle_id, lat, lng } => {
            println!("[fleet] vehicle {vehicle_id} at {lat:.5}, {lng:.5}");
        }
        FleetEvent::VehicleRoute {
            vehicle_id, route, ..
        } => println!("[fleet] vehicle {vehicle_id} route with {} points", route.len()),
        FleetEvent::VehicleSubscribed { vehicle_id } => {
            println!("[fleet] tracking vehicle {vehicle_id}")
        }
        FleetEvent::VehicleUnsubscribed { vehicle_id } => {
            println!("[fleet] stopped tracking vehicle {vehicle_id}")
        }
        FleetEvent::Connected { .. } | FleetEvent::Unrecognized => {}
    }
}
