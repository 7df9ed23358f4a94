use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        GeoPoint, Incident, IncidentId, IncidentStatus, Notification, ServiceType, SeverityLevel,
        Station, StationId, UserAccount, UserId, UserRole, Vehicle, VehicleId, VehicleStatus,
    },
    error::ApiError,
};

/// Body of a broadcast notice. The client only reacts to the action name, so the rest of the
/// frame is kept as an opaque map.
pub type EventPayload = serde_json::Map<String, serde_json::Value>;

/// Requests written to the dispatch channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientRequest {
    #[serde(rename = "action_list_incidents")]
    ListIncidents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<IncidentStatus>,
    },
    #[serde(rename = "action_list_vehicles")]
    ListVehicles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<VehicleStatus>,
    },
    #[serde(rename = "action_list_stations")]
    ListStations,
    #[serde(rename = "action_list_notifications")]
    ListNotifications,
    #[serde(rename = "action_report_incident")]
    ReportIncident {
        #[serde(rename = "type")]
        incident_type: ServiceType,
        severity_level: SeverityLevel,
        lat: f64,
        lng: f64,
        description: String,
    },
    #[serde(rename = "action_create_vehicle")]
    CreateVehicle {
        station_id: StationId,
        capacity: u32,
        lat: f64,
        lng: f64,
    },
    #[serde(rename = "action_create_station")]
    CreateStation {
        #[serde(rename = "type")]
        station_type: ServiceType,
        zone: String,
        lat: f64,
        lng: f64,
    },
    #[serde(rename = "action_delete_vehicle")]
    DeleteVehicle { vehicle_id: VehicleId },
    #[serde(rename = "action_dispatch_incident")]
    DispatchIncident {
        incident_id: IncidentId,
        new_vehicle_id: VehicleId,
    },
    #[serde(rename = "action_pending_to_on_route")]
    PendingToOnRoute {
        vehicle_id: VehicleId,
        incident_id: IncidentId,
    },
    #[serde(rename = "action_resolve_incident")]
    ResolveIncident { incident_id: IncidentId },
    #[serde(rename = "action_update_unit_location")]
    UpdateUnitLocation {
        vehicle_id: VehicleId,
        lat: f64,
        lng: f64,
    },
    #[serde(rename = "action_assign_responder_to_vehicle")]
    AssignResponderToVehicle {
        responder_id: UserId,
        vehicle_id: VehicleId,
    },
    #[serde(rename = "action_get_analytics")]
    GetAnalytics,
}

impl ClientRequest {
    /// Wire name of the request, used for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::ListIncidents { .. } => "action_list_incidents",
            Self::ListVehicles { .. } => "action_list_vehicles",
            Self::ListStations => "action_list_stations",
            Self::ListNotifications => "action_list_notifications",
            Self::ReportIncident { .. } => "action_report_incident",
            Self::CreateVehicle { .. } => "action_create_vehicle",
            Self::CreateStation { .. } => "action_create_station",
            Self::DeleteVehicle { .. } => "action_delete_vehicle",
            Self::DispatchIncident { .. } => "action_dispatch_incident",
            Self::PendingToOnRoute { .. } => "action_pending_to_on_route",
            Self::ResolveIncident { .. } => "action_resolve_incident",
            Self::UpdateUnitLocation { .. } => "action_update_unit_location",
            Self::AssignResponderToVehicle { .. } => "action_assign_responder_to_vehicle",
            Self::GetAnalytics => "action_get_analytics",
        }
    }

    /// Read-only requests never change server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::ListIncidents { .. }
                | Self::ListVehicles { .. }
                | Self::ListStations
                | Self::ListNotifications
                | Self::GetAnalytics
        )
    }
}

/// Acknowledgement body shared by every mutating `*_response` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    #[serde(default)]
    pub average_response_time: Option<f64>,
    #[serde(default)]
    pub max_response_time: Option<f64>,
    #[serde(default)]
    pub min_response_time: Option<f64>,
    #[serde(default)]
    pub best_responder: Option<serde_json::Value>,
    #[serde(default)]
    pub worst_responder: Option<serde_json::Value>,
    #[serde(default)]
    pub best_station: Option<serde_json::Value>,
    #[serde(default)]
    pub worst_station: Option<serde_json::Value>,
    #[serde(default)]
    pub total_incidents_type: Option<serde_json::Value>,
    #[serde(default)]
    pub active_vehicles_type: Option<serde_json::Value>,
}

/// Frames read from the dispatch channel: direct responses and server broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerEvent {
    ListIncidentsResponse {
        incidents: Vec<Incident>,
        #[serde(default)]
        count: Option<usize>,
    },
    ListVehiclesResponse {
        vehicles: Vec<Vehicle>,
        #[serde(default)]
        count: Option<usize>,
    },
    ListStationsResponse {
        stations: Vec<Station>,
        #[serde(default)]
        count: Option<usize>,
    },
    ListNotificationsResponse {
        notifications: Vec<Notification>,
    },
    ReportIncidentResponse(Ack),
    CreateVehicleResponse(Ack),
    CreateStationResponse(Ack),
    DeleteVehicleResponse(Ack),
    DispatchIncidentResponse(Ack),
    ResolveIncidentResponse(Ack),
    PendingToOnRouteResponse(Ack),
    UpdateUnitLocationResponse(Ack),
    AssignResponderToVehicleResponse(Ack),
    NewIncident(EventPayload),
    IncidentUpdated(EventPayload),
    IncidentResolved(EventPayload),
    VehicleCreated(EventPayload),
    VehicleDeleted(EventPayload),
    VehicleStatusUpdated(EventPayload),
    VehicleAssignmentUpdated(EventPayload),
    YouAreAssigned(EventPayload),
    StationCreated(EventPayload),
    NewNotification(EventPayload),
    AnalyticsReceived {
        analytics: AnalyticsSnapshot,
    },
    Error(ApiError),
    #[serde(other)]
    Unrecognized,
}

impl ServerEvent {
    /// Acknowledgement carried by a direct response to a mutating request.
    pub fn acknowledgement(&self) -> Option<&Ack> {
        match self {
            Self::ReportIncidentResponse(ack)
            | Self::CreateVehicleResponse(ack)
            | Self::CreateStationResponse(ack)
            | Self::DeleteVehicleResponse(ack)
            | Self::DispatchIncidentResponse(ack)
            | Self::ResolveIncidentResponse(ack)
            | Self::PendingToOnRouteResponse(ack)
            | Self::UpdateUnitLocationResponse(ack)
            | Self::AssignResponderToVehicleResponse(ack) => Some(ack),
            _ => None,
        }
    }
}

/// Requests written to the fleet tracking channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FleetRequest {
    SubscribeVehicle { vehicle_id: VehicleId },
    UnsubscribeVehicle { vehicle_id: VehicleId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FleetEvent {
    Connected {
        user_id: UserId,
    },
    VehicleSubscribed {
        vehicle_id: VehicleId,
    },
    VehicleUnsubscribed {
        vehicle_id: VehicleId,
    },
    VehicleRoute {
        vehicle_id: VehicleId,
        /// Route points as `[lng, lat]` pairs.
        #[serde(default)]
        route: Vec<[f64; 2]>,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<[f64; 2]>,
    },
    VehicleLocationUpdate {
        vehicle_id: VehicleId,
        lat: f64,
        lng: f64,
    },
    #[serde(other)]
    Unrecognized,
}

impl FleetEvent {
    pub fn vehicle_id(&self) -> Option<VehicleId> {
        match self {
            Self::VehicleSubscribed { vehicle_id }
            | Self::VehicleUnsubscribed { vehicle_id }
            | Self::VehicleRoute { vehicle_id, .. }
            | Self::VehicleLocationUpdate { vehicle_id, .. } => Some(*vehicle_id),
            Self::Connected { .. } | Self::Unrecognized => None,
        }
    }

    pub fn position(&self) -> Option<GeoPoint> {
        match self {
            Self::VehicleLocationUpdate { lat, lng, .. } => Some(GeoPoint {
                lat: *lat,
                lng: *lng,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub user: UserAccount,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportIncidentBody {
    #[serde(rename = "type")]
    pub incident_type: ServiceType,
    pub severity_level: SeverityLevel,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVehicleBody {
    pub station_id: StationId,
    pub capacity: u32,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStationBody {
    #[serde(rename = "type")]
    pub station_type: ServiceType,
    pub zone: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteVehicleBody {
    pub vehicle_id: VehicleId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserBody {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckPasswordBody {
    pub old_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordBody {
    pub new_password: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
