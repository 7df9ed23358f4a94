//! Live tracking of a single vehicle over the fleet channel.

use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::{GeoPoint, VehicleId},
    protocol::{FleetEvent, FleetRequest},
};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    connection::{redact_token, ChannelConnector, FrameSink, FrameSource, InboundFrame},
    error::ClientError,
    session::SessionContext,
};

#[derive(Debug, Clone, PartialEq)]
pub struct FleetUpdate {
    /// Vehicle the channel was subscribed for when the event arrived.
    pub tracked: VehicleId,
    pub event: FleetEvent,
}

struct ActiveTrack {
    vehicle_id: VehicleId,
    sink: Box<dyn FrameSink>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct FleetView {
    positions: HashMap<VehicleId, GeoPoint>,
    routes: HashMap<VehicleId, Vec<[f64; 2]>>,
}

pub struct FleetTracker {
    settings: ClientSettings,
    session: SessionContext,
    connector: Arc<dyn ChannelConnector>,
    active: Mutex<Option<ActiveTrack>>,
    view: Arc<RwLock<FleetView>>,
    updates: broadcast::Sender<FleetUpdate>,
}

impl FleetTracker {
    pub fn new(
        settings: ClientSettings,
        session: SessionContext,
        connector: Arc<dyn ChannelConnector>,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            settings,
            session,
            connector,
            active: Mutex::new(None),
            view: Arc::new(RwLock::new(FleetView::default())),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetUpdate> {
        self.updates.subscribe()
    }

    pub async fn tracked(&self) -> Option<VehicleId> {
        self.active.lock().await.as_ref().map(|track| track.vehicle_id)
    }

    pub async fn last_position(&self, vehicle_id: VehicleId) -> Option<GeoPoint> {
        self.view.read().await.positions.get(&vehicle_id).copied()
    }

    /// Last route received for `vehicle_id`, as `[lng, lat]` pairs.
    pub async fn route(&self, vehicle_id: VehicleId) -> Option<Vec<[f64; 2]>> {
        self.view.read().await.routes.get(&vehicle_id).cloned()
    }

    /// Subscribes to `vehicle_id`. A channel tracking another vehicle is closed before the new
    /// one is opened; tracking the same vehicle again is a no-op.
    pub async fn track(&self, vehicle_id: VehicleId) -> Result<(), ClientError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            if current.vehicle_id == vehicle_id && !current.reader.is_finished() {
                debug!(vehicle_id = vehicle_id.0, "fleet: already tracking vehicle");
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            close_track(previous).await;
        }

        let token = self
            .session
            .access_token()
            .await
            .ok_or(ClientError::MissingToken)?;
        let url = self
            .settings
            .fleet_ws_url(&token)
            .map_err(|err| ClientError::Connect(err.to_string()))?;
        info!(vehicle_id = vehicle_id.0, url = %redact_token(&url), "fleet: connecting");
        let halves = self
            .connector
            .connect(&url)
            .await
            .map_err(|err| ClientError::Connect(format!("{err:#}")))?;

        let mut sink = halves.sink;
        let subscribe = serde_json::to_string(&FleetRequest::SubscribeVehicle { vehicle_id })?;
        if let Err(err) = sink.send_text(subscribe).await {
            let _ = sink.close().await;
            return Err(ClientError::Transport(format!("{err:#}")));
        }

        let reader = tokio::spawn(read_fleet_frames(
            vehicle_id,
            halves.source,
            Arc::clone(&self.view),
            self.updates.clone(),
        ));
        *active = Some(ActiveTrack {
            vehicle_id,
            sink,
            reader,
        });
        Ok(())
    }

    /// Unsubscribes and closes the fleet channel, if one is open.
    pub async fn stop(&self) {
        if let Some(track) = self.active.lock().await.take() {
            close_track(track).await;
        }
    }
}

async fn close_track(mut track: ActiveTrack) {
    let vehicle_id = track.vehicle_id;
    if !track.reader.is_finished() {
        match serde_json::to_string(&FleetRequest::UnsubscribeVehicle { vehicle_id }) {
            Ok(text) => {
                if let Err(err) = track.sink.send_text(text).await {
                    warn!(vehicle_id = vehicle_id.0, "fleet: unsubscribe failed: {err:#}");
                }
            }
            Err(err) => warn!("fleet: failed to encode unsubscribe: {err}"),
        }
    }
    if let Err(err) = track.sink.close().await {
        debug!(vehicle_id = vehicle_id.0, "fleet: close failed: {err:#}");
    }
    track.reader.abort();
    info!(vehicle_id = vehicle_id.0, "fleet: stopped tracking");
}

async fn read_fleet_frames(
    tracked: VehicleId,
    mut source: Box<dyn FrameSource>,
    view: Arc<RwLock<FleetView>>,
    updates: broadcast::Sender<FleetUpdate>,
) {
    while let Some(frame) = source.next_frame().await {
        let text = match frame {
            Ok(InboundFrame::Text(text)) => text,
            Ok(InboundFrame::Closed) => break,
            Err(err) => {
                warn!(vehicle_id = tracked.0, "fleet: channel read failed: {err:#}");
                break;
            }
        };
        let event = match serde_json::from_str::<FleetEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                warn!(vehicle_id = tracked.0, "fleet: dropping malformed frame: {err}");
                continue;
            }
        };
        match &event {
            FleetEvent::VehicleLocationUpdate { vehicle_id, .. } => {
                if let Some(position) = event.position() {
                    view.write().await.positions.insert(*vehicle_id, position);
                }
            }
            FleetEvent::VehicleRoute {
                vehicle_id, route, ..
            } => {
                view.write().await.routes.insert(*vehicle_id, route.clone());
            }
            FleetEvent::Unrecognized => {
                debug!("fleet: ignoring unrecognized action");
                continue;
            }
            _ => {}
        }
        let _ = updates.send(FleetUpdate { tracked, event });
    }
    info!(vehicle_id = tracked.0, "fleet: channel closed");
}

#[cfg(test)]
#[path = "tests/fleet_tests.rs"]
mod tests;
