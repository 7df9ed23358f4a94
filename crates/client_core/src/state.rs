//! Local mirror of the server's dispatch collections and the reconciliation rules that keep
//! it in step with inbound frames.

use std::collections::HashMap;

use shared::{
    domain::{
        Incident, IncidentId, Notification, NotificationId, ServiceType, Station, Vehicle,
        VehicleId,
    },
    protocol::{AnalyticsSnapshot, ClientRequest, ServerEvent},
};
use tracing::{debug, warn};

use crate::notice::Notice;

pub const NOTIFICATION_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Incidents,
    Vehicles,
    Stations,
    Notifications,
}

impl Collection {
    pub fn list_request(self) -> ClientRequest {
        match self {
            Self::Incidents => ClientRequest::ListIncidents { status: None },
            Self::Vehicles => ClientRequest::ListVehicles { status: None },
            Self::Stations => ClientRequest::ListStations,
            Self::Notifications => ClientRequest::ListNotifications,
        }
    }

    /// Collections requested as soon as the channel opens.
    pub fn initial() -> [Collection; 3] {
        [Self::Incidents, Self::Vehicles, Self::Stations]
    }
}

/// The single logical effect of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    Replaced(Collection),
    Refetch(Collection),
    Notice(Notice),
    Analytics(AnalyticsSnapshot),
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchState {
    incidents: Vec<Incident>,
    vehicles: Vec<Vehicle>,
    stations: Vec<Station>,
    notifications: Vec<Notification>,
}

impl DispatchState {
    pub fn apply(&mut self, event: ServerEvent) -> Reaction {
        match event {
            ServerEvent::ListIncidentsResponse { incidents, .. } => {
                self.replace_incidents(incidents);
                Reaction::Replaced(Collection::Incidents)
            }
            ServerEvent::ListVehiclesResponse { vehicles, .. } => {
                self.vehicles = vehicles;
                Reaction::Replaced(Collection::Vehicles)
            }
            ServerEvent::ListStationsResponse { stations, .. } => {
                self.stations = stations;
                Reaction::Replaced(Collection::Stations)
            }
            ServerEvent::ListNotificationsResponse { notifications } => {
                self.merge_notifications(notifications);
                Reaction::Replaced(Collection::Notifications)
            }
            ServerEvent::NewIncident(_)
            | ServerEvent::IncidentUpdated(_)
            | ServerEvent::IncidentResolved(_)
            | ServerEvent::ReportIncidentResponse(_)
            | ServerEvent::DispatchIncidentResponse(_)
            | ServerEvent::ResolveIncidentResponse(_)
            | ServerEvent::PendingToOnRouteResponse(_) => Reaction::Refetch(Collection::Incidents),
            ServerEvent::VehicleCreated(_)
            | ServerEvent::VehicleDeleted(_)
            | ServerEvent::VehicleStatusUpdated(_)
            | ServerEvent::VehicleAssignmentUpdated(_)
            | ServerEvent::YouAreAssigned(_)
            | ServerEvent::CreateVehicleResponse(_)
            | ServerEvent::DeleteVehicleResponse(_)
            | ServerEvent::UpdateUnitLocationResponse(_)
            | ServerEvent::AssignResponderToVehicleResponse(_) => {
                Reaction::Refetch(Collection::Vehicles)
            }
            ServerEvent::StationCreated(_) | ServerEvent::CreateStationResponse(_) => {
                Reaction::Refetch(Collection::Stations)
            }
            ServerEvent::NewNotification(_) => Reaction::Refetch(Collection::Notifications),
            ServerEvent::AnalyticsReceived { analytics } => Reaction::Analytics(analytics),
            ServerEvent::Error(err) => Reaction::Notice(Notice::server_error(err.message)),
            ServerEvent::Unrecognized => {
                debug!("dispatch: ignoring unrecognized server action");
                Reaction::Ignored
            }
        }
    }

    fn replace_incidents(&mut self, incidents: Vec<Incident>) {
        let previous: HashMap<IncidentId, _> = self
            .incidents
            .iter()
            .map(|incident| (incident.incident_id, incident.status))
            .collect();
        for incident in &incidents {
            if let Some(before) = previous.get(&incident.incident_id) {
                if !before.can_transition_to(incident.status) {
                    warn!(
                        incident_id = incident.incident_id.0,
                        from = ?before,
                        to = ?incident.status,
                        "dispatch: server list moved incident backwards in its lifecycle"
                    );
                }
            }
        }
        self.incidents = incidents;
    }

    /// Accumulates history pages: one entry per id, newest first, read flags are sticky.
    pub fn merge_notifications(&mut self, incoming: Vec<Notification>) {
        for mut notification in incoming {
            match self
                .notifications
                .iter_mut()
                .find(|existing| existing.notification_id == notification.notification_id)
            {
                Some(existing) => {
                    notification.is_read |= existing.is_read;
                    *existing = notification;
                }
                None => self.notifications.push(notification),
            }
        }
        self.notifications.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.notification_id.cmp(&a.notification_id))
        });
        self.notifications.truncate(NOTIFICATION_HISTORY_LIMIT);
    }

    pub fn mark_notification_read(&mut self, notification_id: NotificationId) -> bool {
        match self
            .notifications
            .iter_mut()
            .find(|n| n.notification_id == notification_id)
        {
            Some(notification) => {
                notification.is_read = true;
                true
            }
            None => false,
        }
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn incident(&self, incident_id: IncidentId) -> Option<&Incident> {
        self.incidents
            .iter()
            .find(|incident| incident.incident_id == incident_id)
    }

    pub fn vehicle(&self, vehicle_id: VehicleId) -> Option<&Vehicle> {
        self.vehicles
            .iter()
            .find(|vehicle| vehicle.vehicle_id == vehicle_id)
    }

    pub fn active_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents
            .iter()
            .filter(|incident| incident.status.is_active())
    }

    /// Vehicles a dispatcher may assign to an incident of `service`.
    pub fn dispatchable_vehicles(&self, service: ServiceType) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter().filter(move |vehicle| {
            vehicle.status.is_dispatchable() && vehicle.vehicle_type.map_or(true, |t| t == service)
        })
    }

    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Incidents => self.incidents.len(),
            Collection::Vehicles => self.vehicles.len(),
            Collection::Stations => self.stations.len(),
            Collection::Notifications => self.notifications.len(),
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
