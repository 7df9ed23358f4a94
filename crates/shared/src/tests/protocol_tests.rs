use super::*;
use crate::domain::NotificationId;
use serde_json::json;

#[test]
fn requests_carry_action_tag_and_wire_field_names() {
    let request = ClientRequest::ReportIncident {
        incident_type: ServiceType::Fire,
        severity_level: SeverityLevel::Critical,
        lat: 14.6,
        lng: 121.0,
        description: "Warehouse fire".into(),
    };
    assert_eq!(
        serde_json::to_value(&request).expect("encode"),
        json!({
            "action": "action_report_incident",
            "type": "FIRE",
            "severity_level": "CRITICAL",
            "lat": 14.6,
            "lng": 121.0,
            "description": "Warehouse fire"
        })
    );
    assert_eq!(request.action(), "action_report_incident");
    assert!(request.is_mutating());
}

#[test]
fn list_requests_omit_missing_status_filter() {
    assert_eq!(
        serde_json::to_value(ClientRequest::ListIncidents { status: None }).expect("encode"),
        json!({"action": "action_list_incidents"})
    );
    assert_eq!(
        serde_json::to_value(ClientRequest::ListVehicles {
            status: Some(VehicleStatus::OnRoute)
        })
        .expect("encode"),
        json!({"action": "action_list_vehicles", "status": "ON_ROUTE"})
    );
    assert!(!ClientRequest::ListStations.is_mutating());
}

#[test]
fn minimal_vehicle_parses() {
    let event: ServerEvent = serde_json::from_value(json!({
        "action": "list_vehicles_response",
        "vehicles": [{"vehicle_id": 5, "status": "AVAILABLE"}]
    }))
    .expect("decode");
    match event {
        ServerEvent::ListVehiclesResponse { vehicles, count } => {
            assert_eq!(count, None);
            assert_eq!(vehicles[0].vehicle_id, VehicleId(5));
            assert_eq!(vehicles[0].status, VehicleStatus::Available);
            assert_eq!(vehicles[0].location, None);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn incident_fields_follow_backend_names() {
    let incident: Incident = serde_json::from_value(json!({
        "incident_id": 3,
        "type": "POLICE",
        "severity_level": "LOW",
        "status": "PENDING",
        "lat": 14.5,
        "lng": 120.9,
        "zone": "North",
        "time_reported": "2025-01-03T10:15:00.123456",
        "assigned_vehicle_ids": [4, 5]
    }))
    .expect("incident");
    assert_eq!(incident.incident_type, ServiceType::Police);
    assert_eq!(incident.location, Some(GeoPoint { lat: 14.5, lng: 120.9 }));
    assert_eq!(incident.assigned_vehicle_ids, vec![VehicleId(4), VehicleId(5)]);
    assert!(incident.time_reported.is_some());
    assert!(incident.status.can_transition_to(IncidentStatus::Assigned));
    assert!(!incident.status.can_transition_to(IncidentStatus::Reported));
}

#[test]
fn broadcasts_accept_arbitrary_payloads() {
    let event: ServerEvent = serde_json::from_value(json!({
        "action": "vehicle_status_updated",
        "vehicle_id": 5,
        "status": "BUSY",
        "extra": {"nested": true}
    }))
    .expect("decode");
    match event {
        ServerEvent::VehicleStatusUpdated(payload) => {
            assert_eq!(payload.get("vehicle_id"), Some(&json!(5)));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn unknown_actions_decode_as_unrecognized() {
    let event: ServerEvent =
        serde_json::from_value(json!({"action": "chat_message", "text": "hi"})).expect("decode");
    assert_eq!(event, ServerEvent::Unrecognized);
}

#[test]
fn frames_without_action_are_rejected() {
    assert!(serde_json::from_value::<ServerEvent>(json!({"incidents": []})).is_err());
    assert!(serde_json::from_str::<ServerEvent>("not json").is_err());
}

#[test]
fn error_frames_carry_message() {
    let event: ServerEvent =
        serde_json::from_value(json!({"action": "error", "message": "Vehicle not found"}))
            .expect("decode");
    assert_eq!(event, ServerEvent::Error(ApiError::new("Vehicle not found")));
}

#[test]
fn acknowledgements_are_exposed_for_mutating_responses() {
    let event: ServerEvent = serde_json::from_value(json!({
        "action": "resolve_incident_response",
        "message": "Incident resolved"
    }))
    .expect("decode");
    assert_eq!(
        event.acknowledgement().and_then(|ack| ack.message.as_deref()),
        Some("Incident resolved")
    );
    assert!(ServerEvent::Unrecognized.acknowledgement().is_none());
}

#[test]
fn fleet_events_expose_vehicle_and_position() {
    let update: FleetEvent = serde_json::from_value(json!({
        "action": "vehicle_location_update",
        "vehicle_id": 8,
        "lat": 14.6,
        "lng": 121.0
    }))
    .expect("decode");
    assert_eq!(update.vehicle_id(), Some(VehicleId(8)));
    assert_eq!(update.position(), Some(GeoPoint { lat: 14.6, lng: 121.0 }));

    assert_eq!(
        serde_json::to_value(FleetRequest::SubscribeVehicle {
            vehicle_id: VehicleId(8)
        })
        .expect("encode"),
        json!({"action": "subscribe_vehicle", "vehicle_id": 8})
    );
}

#[test]
fn notifications_accept_short_field_aliases() {
    let event: ServerEvent = serde_json::from_value(json!({
        "action": "list_notifications_response",
        "notifications": [{"id": 1, "title": "Assigned", "read": true}]
    }))
    .expect("decode");
    match event {
        ServerEvent::ListNotificationsResponse { notifications } => {
            assert_eq!(notifications[0].notification_id, NotificationId(1));
            assert!(notifications[0].is_read);
            assert_eq!(notifications[0].body, "");
        }
        other => panic!("unexpected event {other:?}"),
    }
}
