//! Line commands typed at the console prompt.

use dispatch_client::Collection;
use shared::domain::{
    GeoPoint, IncidentId, NotificationId, ServiceType, SeverityLevel, StationId, UserId, VehicleId,
};

pub const HELP: &str = "\
commands:
  login <email> <password>
  incidents | vehicles | stations | notifications
  refresh <incidents|vehicles|stations|notifications>
  report <type> <severity> <lat> <lng> <description...>
  create-vehicle <station_id> <capacity> <lat> <lng>
  create-station <type> <zone> <lat> <lng>
  delete-vehicle <vehicle_id>
  dispatch <incident_id> <vehicle_id>
  accept <vehicle_id> <incident_id>
  resolve <incident_id>
  locate <vehicle_id> <lat> <lng>
  assign-responder <responder_id> <vehicle_id>
  analytics
  read <notification_id>
  track <vehicle_id> | untrack
  change-password <old> <new>
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Login {
        email: String,
        password: String,
    },
    Show(Collection),
    Refresh(Collection),
    Report {
        incident_type: ServiceType,
        severity_level: SeverityLevel,
        location: GeoPoint,
        description: String,
    },
    CreateVehicle {
        station_id: StationId,
        capacity: u32,
        location: GeoPoint,
    },
    CreateStation {
        station_type: ServiceType,
        zone: String,
        location: GeoPoint,
    },
    DeleteVehicle(VehicleId),
    Dispatch {
        incident_id: IncidentId,
        vehicle_id: VehicleId,
    },
    Accept {
        vehicle_id: VehicleId,
        incident_id: IncidentId,
    },
    Resolve(IncidentId),
    Locate {
        vehicle_id: VehicleId,
        location: GeoPoint,
    },
    AssignResponder {
        responder_id: UserId,
        vehicle_id: VehicleId,
    },
    Analytics,
    Read(NotificationId),
    Track(VehicleId),
    Untrack,
    ChangePassword {
        old_password: String,
        new_password: String,
    },
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();
    let command = match verb.to_ascii_lowercase().as_str() {
        "login" => {
            expect_args(verb, &args, 2)?;
            ConsoleCommand::Login {
                email: args[0].to_string(),
                password: args[1].to_string(),
            }
        }
        "incidents" => ConsoleCommand::Show(Collection::Incidents),
        "vehicles" => ConsoleCommand::Show(Collection::Vehicles),
        "stations" => ConsoleCommand::Show(Collection::Stations),
        "notifications" => ConsoleCommand::Show(Collection::Notifications),
        "refresh" => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::Refresh(parse_collection(args[0])?)
        }
        "report" => {
            if args.len() < 5 {
                return Err("usage: report <type> <severity> <lat> <lng> <description...>".into());
            }
            ConsoleCommand::Report {
                incident_type: args[0].parse()?,
                severity_level: args[1].parse()?,
                location: parse_location(args[2], args[3])?,
                description: args[4..].join(" "),
            }
        }
        "create-vehicle" => {
            expect_args(verb, &args, 4)?;
            ConsoleCommand::CreateVehicle {
                station_id: StationId(parse_number(args[0], "station_id")?),
                capacity: parse_number(args[1], "capacity")?,
                location: parse_location(args[2], args[3])?,
            }
        }
        "create-station" => {
            expect_args(verb, &args, 4)?;
            ConsoleCommand::CreateStation {
                station_type: args[0].parse()?,
                zone: args[1].to_string(),
                location: parse_location(args[2], args[3])?,
            }
        }
        "delete-vehicle" => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::DeleteVehicle(VehicleId(parse_number(args[0], "vehicle_id")?))
        }
        "dispatch" => {
            expect_args(verb, &args, 2)?;
            ConsoleCommand::Dispatch {
                incident_id: IncidentId(parse_number(args[0], "incident_id")?),
                vehicle_id: VehicleId(parse_number(args[1], "vehicle_id")?),
            }
        }
        "accept" => {
            expect_args(verb, &args, 2)?;
            ConsoleCommand::Accept {
                vehicle_id: VehicleId(parse_number(args[0], "vehicle_id")?),
                incident_id: IncidentId(parse_number(args[1], "incident_id")?),
            }
        }
        "resolve" => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::Resolve(IncidentId(parse_number(args[0], "incident_id")?))
        }
        "locate" => {
            expect_args(verb, &args, 3)?;
            ConsoleCommand::Locate {
                vehicle_id: VehicleId(parse_number(args[0], "vehicle_id")?),
                location: parse_location(args[1], args[2])?,
            }
        }
        "assign-responder" => {
            expect_args(verb, &args, 2)?;
            ConsoleCommand::AssignResponder {
                responder_id: UserId(parse_number(args[0], "responder_id")?),
                vehicle_id: VehicleId(parse_number(args[1], "vehicle_id")?),
            }
        }
        "analytics" => ConsoleCommand::Analytics,
        "read" => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::Read(NotificationId(parse_number(args[0], "notification_id")?))
        }
        "track" => {
            expect_args(verb, &args, 1)?;
            ConsoleCommand::Track(VehicleId(parse_number(args[0], "vehicle_id")?))
        }
        "untrack" => ConsoleCommand::Untrack,
        "change-password" => {
            expect_args(verb, &args, 2)?;
            ConsoleCommand::ChangePassword {
                old_password: args[0].to_string(),
                new_password: args[1].to_string(),
            }
        }
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command `{other}`; type `help`")),
    };
    Ok(command)
}

fn expect_args(verb: &str, args: &[&str], count: usize) -> Result<(), String> {
    if args.len() == count {
        Ok(())
    } else {
        Err(format!(
            "`{verb}` takes {count} argument(s), got {}",
            args.len()
        ))
    }
}

fn parse_collection(raw: &str) -> Result<Collection, String> {
    match raw.to_ascii_lowercase().as_str() {
        "incidents" => Ok(Collection::Incidents),
        "vehicles" => Ok(Collection::Vehicles),
        "stations" => Ok(Collection::Stations),
        "notifications" => Ok(Collection::Notifications),
        other => Err(format!("unknown collection `{other}`")),
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{field} must be a number, got `{raw}`"))
}

fn parse_location(lat: &str, lng: &str) -> Result<GeoPoint, String> {
    let lat: f64 = parse_number(lat, "lat")?;
    let lng: f64 = parse_number(lng, "lng")?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(format!("coordinates out of range: {lat}, {lng}"));
    }
    Ok(GeoPoint { lat, lng })
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
