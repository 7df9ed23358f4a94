use chrono::NaiveDateTime;
use serde::{de, Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(IncidentId);
id_newtype!(VehicleId);
id_newtype!(StationId);
id_newtype!(UserId);
id_newtype!(NotificationId);

/// Emergency service kind shared by incidents, vehicles and stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Police,
    Fire,
    Medical,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Police => "POLICE",
            Self::Fire => "FIRE",
            Self::Medical => "MEDICAL",
        }
    }
}

impl std::str::FromStr for ServiceType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "POLICE" => Ok(Self::Police),
            "FIRE" => Ok(Self::Fire),
            "MEDICAL" => Ok(Self::Medical),
            other => Err(format!("unknown service type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for SeverityLevel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown severity level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Reported,
    Assigned,
    Pending,
    OnRoute,
    Resolved,
}

impl IncidentStatus {
    /// Lifecycle stage. `Assigned` and `Pending` are the same stage under two names.
    pub fn stage(self) -> u8 {
        match self {
            Self::Reported => 0,
            Self::Assigned | Self::Pending => 1,
            Self::OnRoute => 2,
            Self::Resolved => 3,
        }
    }

    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        next.stage() >= self.stage()
    }

    pub fn is_active(self) -> bool {
        self != Self::Resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Available,
    Pending,
    OnRoute,
    Busy,
    Maintenance,
}

impl VehicleStatus {
    pub fn is_dispatchable(self) -> bool {
        self == Self::Available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Dispatcher,
    Responder,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Dispatcher => "DISPATCHER",
            Self::Responder => "RESPONDER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: IncidentId,
    #[serde(rename = "type")]
    pub incident_type: ServiceType,
    pub severity_level: SeverityLevel,
    pub status: IncidentStatus,
    #[serde(flatten)]
    pub location: Option<GeoPoint>,
    #[serde(default, alias = "station_zones", skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_reported: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_resolved: Option<NaiveDateTime>,
    #[serde(
        default,
        alias = "vehicle_ids",
        deserialize_with = "vehicle_id_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub assigned_vehicle_ids: Vec<VehicleId>,
}

/// Assigned units arrive either as a JSON list or as the backend's comma-joined string.
fn vehicle_id_list<'de, D>(deserializer: D) -> Result<Vec<VehicleId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<VehicleId>),
        Single(VehicleId),
        Joined(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(Raw::List(ids)) => Ok(ids),
        Some(Raw::Single(id)) => Ok(vec![id]),
        Some(Raw::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>()
                    .map(VehicleId)
                    .map_err(|_| de::Error::custom(format!("invalid vehicle id `{part}`")))
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: VehicleId,
    pub status: VehicleStatus,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<ServiceType>,
    #[serde(flatten)]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<StationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: StationId,
    #[serde(rename = "type")]
    pub station_type: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(flatten)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub vehicle_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(alias = "id")]
    pub notification_id: NotificationId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, alias = "read")]
    pub is_read: bool,
}

/// Account as returned by the login endpoint; the password hash is never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub role: UserRole,
}
