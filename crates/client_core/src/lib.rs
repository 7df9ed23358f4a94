use std::sync::Arc;

use shared::{
    domain::{
        GeoPoint, Incident, IncidentId, IncidentStatus, Notification, NotificationId,
        ServiceType, SeverityLevel, Station, StationId, UserId, Vehicle, VehicleId, VehicleStatus,
    },
    protocol::{AnalyticsSnapshot, ClientRequest, ServerEvent},
};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod fleet;
pub mod notice;
pub mod session;
pub mod state;

pub use api::RestClient;
pub use config::{load_settings, ClientSettings, ReconnectPolicy};
pub use connection::{ChannelConnector, ConnectionState, WsConnector};
pub use error::{ApiCallError, ClientError, SessionError};
pub use fleet::{FleetTracker, FleetUpdate};
pub use notice::{Notice, NoticeKind, NoticeSeverity};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionContext, SessionStore};
pub use state::{Collection, DispatchState};

use connection::{redact_token, FrameSink, FrameSource, InboundFrame};
use state::Reaction;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionStateChanged(ConnectionState),
    CollectionReplaced {
        collection: Collection,
        len: usize,
    },
    RefetchRequested(Collection),
    Notice(Notice),
    Acknowledged {
        message: Option<String>,
    },
    Analytics(AnalyticsSnapshot),
    SessionExpired,
}

/// Live dispatch session: one channel used both to send actions and to receive the
/// responses and broadcasts that keep [`DispatchState`] current.
pub struct DispatchClient {
    settings: ClientSettings,
    session: SessionContext,
    connector: Arc<dyn ChannelConnector>,
    rest: RestClient,
    inner: Mutex<ChannelState>,
    collections: RwLock<DispatchState>,
    events: broadcast::Sender<ClientEvent>,
}

struct ChannelState {
    state: ConnectionState,
    sink: Option<Box<dyn FrameSink>>,
    reader: Option<JoinHandle<()>>,
    unmounted: bool,
    /// Bumped whenever a channel is opened or the client unmounts, so a reader of an older
    /// channel can tell it has been superseded.
    generation: u64,
}

impl DispatchClient {
    pub fn new(settings: ClientSettings, session: SessionContext) -> Arc<Self> {
        Self::new_with_connector(settings, session, Arc::new(WsConnector))
    }

    pub fn new_with_connector(
        settings: ClientSettings,
        session: SessionContext,
        connector: Arc<dyn ChannelConnector>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            rest: RestClient::new(settings.clone(), session.clone(), events.clone()),
            settings,
            session,
            connector,
            inner: Mutex::new(ChannelState {
                state: ConnectionState::Disconnected,
                sink: None,
                reader: None,
                unmounted: false,
                generation: 0,
            }),
            collections: RwLock::new(DispatchState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// REST client sharing this session and event stream.
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Fleet tracker sharing this session and transport.
    pub fn fleet_tracker(&self) -> FleetTracker {
        FleetTracker::new(
            self.settings.clone(),
            self.session.clone(),
            Arc::clone(&self.connector),
        )
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Mounts the session: opens the dispatch channel and requests the initial lists.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        {
            let mut guard = self.inner.lock().await;
            let running = guard
                .reader
                .as_ref()
                .is_some_and(|reader| !reader.is_finished());
            if running || guard.state == ConnectionState::Connecting {
                debug!(state = %guard.state, "dispatch: channel already mounted");
                return Ok(());
            }
            guard.unmounted = false;
        }

        let (generation, source) = self.open_channel().await?;
        let reader = tokio::spawn(Arc::clone(self).run_channel(generation, source));
        let mut guard = self.inner.lock().await;
        if guard.unmounted {
            reader.abort();
        } else {
            guard.reader = Some(reader);
        }
        Ok(())
    }

    /// Unmounts the session. The channel is closed at most once and no frame is handled
    /// afterwards; reconnection stops.
    pub async fn shutdown(&self) {
        let (sink, reader) = {
            let mut guard = self.inner.lock().await;
            if guard.unmounted {
                return;
            }
            guard.unmounted = true;
            guard.generation += 1;
            let sink = guard.sink.take();
            let reader = guard.reader.take();
            if guard.state != ConnectionState::Disconnected {
                self.transition(&mut guard, ConnectionState::Closed);
            }
            (sink, reader)
        };
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }
        if let Some(mut sink) = sink {
            if let Err(err) = sink.close().await {
                debug!("dispatch: close failed: {err:#}");
            }
        }
        info!("dispatch: unmounted");
    }

    pub async fn report_incident(
        &self,
        incident_type: ServiceType,
        severity_level: SeverityLevel,
        location: GeoPoint,
        description: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::ReportIncident {
            incident_type,
            severity_level,
            lat: location.lat,
            lng: location.lng,
            description: description.into(),
        })
        .await
    }

    pub async fn create_vehicle(
        &self,
        station_id: StationId,
        capacity: u32,
        location: GeoPoint,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::CreateVehicle {
            station_id,
            capacity,
            lat: location.lat,
            lng: location.lng,
        })
        .await
    }

    pub async fn create_station(
        &self,
        station_type: ServiceType,
        zone: impl Into<String>,
        location: GeoPoint,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::CreateStation {
            station_type,
            zone: zone.into(),
            lat: location.lat,
            lng: location.lng,
        })
        .await
    }

    pub async fn delete_vehicle(&self, vehicle_id: VehicleId) -> Result<(), ClientError> {
        self.send_request(ClientRequest::DeleteVehicle { vehicle_id })
            .await
    }

    pub async fn dispatch_incident(
        &self,
        incident_id: IncidentId,
        vehicle_id: VehicleId,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::DispatchIncident {
            incident_id,
            new_vehicle_id: vehicle_id,
        })
        .await
    }

    /// Responder accepts a pending assignment; the vehicle goes on route.
    pub async fn accept_assignment(
        &self,
        vehicle_id: VehicleId,
        incident_id: IncidentId,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::PendingToOnRoute {
            vehicle_id,
            incident_id,
        })
        .await
    }

    pub async fn resolve_incident(&self, incident_id: IncidentId) -> Result<(), ClientError> {
        self.send_request(ClientRequest::ResolveIncident { incident_id })
            .await
    }

    pub async fn update_unit_location(
        &self,
        vehicle_id: VehicleId,
        location: GeoPoint,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::UpdateUnitLocation {
            vehicle_id,
            lat: location.lat,
            lng: location.lng,
        })
        .await
    }

    pub async fn assign_responder_to_vehicle(
        &self,
        responder_id: UserId,
        vehicle_id: VehicleId,
    ) -> Result<(), ClientError> {
        self.send_request(ClientRequest::AssignResponderToVehicle {
            responder_id,
            vehicle_id,
        })
        .await
    }

    pub async fn list_incidents(&self, status: Option<IncidentStatus>) -> Result<(), ClientError> {
        self.send_request(ClientRequest::ListIncidents { status })
            .await
    }

    pub async fn list_vehicles(&self, status: Option<VehicleStatus>) -> Result<(), ClientError> {
        self.send_request(ClientRequest::ListVehicles { status })
            .await
    }

    pub async fn refresh(&self, collection: Collection) -> Result<(), ClientError> {
        self.send_request(collection.list_request()).await
    }

    pub async fn request_analytics(&self) -> Result<(), ClientError> {
        self.send_request(ClientRequest::GetAnalytics).await
    }

    /// Writes one request to the channel. When the channel is not open nothing is written and
    /// exactly one connectivity notice is raised.
    pub async fn send_request(&self, request: ClientRequest) -> Result<(), ClientError> {
        let mut guard = self.inner.lock().await;
        if guard.state != ConnectionState::Open || guard.sink.is_none() {
            let state = guard.state;
            drop(guard);
            warn!(action = request.action(), %state, "dispatch: channel not open; request dropped");
            let _ = self
                .events
                .send(ClientEvent::Notice(Notice::not_connected(request.action())));
            return Err(ClientError::NotConnected(state));
        }
        write_request(&mut guard, &request).await
    }

    pub async fn snapshot(&self) -> DispatchState {
        self.collections.read().await.clone()
    }

    pub async fn incidents(&self) -> Vec<Incident> {
        self.collections.read().await.incidents().to_vec()
    }

    pub async fn vehicles(&self) -> Vec<Vehicle> {
        self.collections.read().await.vehicles().to_vec()
    }

    pub async fn stations(&self) -> Vec<Station> {
        self.collections.read().await.stations().to_vec()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.collections.read().await.notifications().to_vec()
    }

    pub async fn mark_notification_read(&self, notification_id: NotificationId) -> bool {
        self.collections
            .write()
            .await
            .mark_notification_read(notification_id)
    }

    /// Connects, installs the sink and sends the initial list requests.
    async fn open_channel(&self) -> Result<(u64, Box<dyn FrameSource>), ClientError> {
        {
            let mut guard = self.inner.lock().await;
            self.transition(&mut guard, ConnectionState::Connecting);
        }

        let halves = match self.dial().await {
            Ok(halves) => halves,
            Err(err) => {
                let mut guard = self.inner.lock().await;
                if !guard.unmounted {
                    self.transition(&mut guard, ConnectionState::Closed);
                }
                return Err(err);
            }
        };

        let mut guard = self.inner.lock().await;
        if guard.unmounted {
            drop(guard);
            let mut sink = halves.sink;
            let _ = sink.close().await;
            return Err(ClientError::NotConnected(ConnectionState::Closed));
        }
        guard.generation += 1;
        let generation = guard.generation;
        guard.sink = Some(halves.sink);
        self.transition(&mut guard, ConnectionState::Open);

        for collection in Collection::initial() {
            if let Err(err) = write_request(&mut guard, &collection.list_request()).await {
                warn!(?collection, "dispatch: initial list request failed: {err}");
            }
        }
        Ok((generation, halves.source))
    }

    async fn dial(&self) -> Result<connection::ChannelHalves, ClientError> {
        let token = self
            .session
            .access_token()
            .await
            .ok_or(ClientError::MissingToken)?;
        let url = self
            .settings
            .dispatch_ws_url(&token)
            .map_err(|err| ClientError::Connect(err.to_string()))?;
        info!(url = %redact_token(&url), "dispatch: connecting");
        self.connector
            .connect(&url)
            .await
            .map_err(|err| ClientError::Connect(format!("{err:#}")))
    }

    /// Reader loop for the lifetime of the mount, including reconnections.
    async fn run_channel(self: Arc<Self>, mut generation: u64, mut source: Box<dyn FrameSource>) {
        loop {
            self.read_frames(generation, source.as_mut()).await;
            if !self.mark_closed(generation).await {
                return;
            }
            match self.reconnect().await {
                Some((next_generation, next_source)) => {
                    generation = next_generation;
                    source = next_source;
                }
                None => return,
            }
        }
    }

    async fn read_frames(&self, generation: u64, source: &mut dyn FrameSource) {
        while let Some(frame) = source.next_frame().await {
            if !self.is_current(generation).await {
                return;
            }
            match frame {
                Ok(InboundFrame::Text(text)) => self.handle_frame(&text).await,
                Ok(InboundFrame::Closed) => return,
                Err(err) => {
                    warn!("dispatch: channel read failed: {err:#}");
                    return;
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                warn!("dispatch: dropping malformed frame: {err}");
                return;
            }
        };
        let acknowledgement = event.acknowledgement().map(|ack| ack.message.clone());

        let (reaction, len) = {
            let mut collections = self.collections.write().await;
            let reaction = collections.apply(event);
            let len = match &reaction {
                Reaction::Replaced(collection) => collections.len(*collection),
                _ => 0,
            };
            (reaction, len)
        };

        match reaction {
            Reaction::Replaced(collection) => {
                debug!(?collection, len, "dispatch: collection replaced");
                let _ = self
                    .events
                    .send(ClientEvent::CollectionReplaced { collection, len });
            }
            Reaction::Refetch(collection) => {
                debug!(?collection, "dispatch: refetching after change");
                match self.send_request(collection.list_request()).await {
                    Ok(()) => {
                        let _ = self.events.send(ClientEvent::RefetchRequested(collection));
                    }
                    Err(err) => warn!(?collection, "dispatch: refetch failed: {err}"),
                }
            }
            Reaction::Notice(notice) => {
                warn!(message = %notice.message, "dispatch: server reported an error");
                let _ = self.events.send(ClientEvent::Notice(notice));
            }
            Reaction::Analytics(analytics) => {
                let _ = self.events.send(ClientEvent::Analytics(analytics));
            }
            Reaction::Ignored => {}
        }

        if let Some(message) = acknowledgement {
            let _ = self.events.send(ClientEvent::Acknowledged { message });
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        let guard = self.inner.lock().await;
        !guard.unmounted && guard.generation == generation
    }

    /// Records a close not caused by unmount. Returns whether a reconnect should follow.
    async fn mark_closed(&self, generation: u64) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.unmounted || guard.generation != generation {
            return false;
        }
        guard.sink = None;
        self.transition(&mut guard, ConnectionState::Closed);
        info!("dispatch: channel closed");
        self.settings.reconnect.max_attempts > 0
    }

    async fn reconnect(&self) -> Option<(u64, Box<dyn FrameSource>)> {
        let policy = &self.settings.reconnect;
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            if self.inner.lock().await.unmounted {
                return None;
            }
            info!(attempt, max_attempts = policy.max_attempts, "dispatch: reconnecting");
            match self.open_channel().await {
                Ok(opened) => return Some(opened),
                Err(ClientError::MissingToken) => {
                    warn!("dispatch: session has no access token; not reconnecting");
                    return None;
                }
                Err(err) => warn!(attempt, "dispatch: reconnect attempt failed: {err}"),
            }
        }
        if self.inner.lock().await.unmounted {
            return None;
        }
        warn!(
            attempts = policy.max_attempts,
            "dispatch: giving up on reconnection"
        );
        let _ = self.events.send(ClientEvent::Notice(Notice::new(
            NoticeKind::Connectivity,
            NoticeSeverity::Error,
            "Dispatch channel lost; reconnection failed.",
        )));
        None
    }

    fn transition(&self, guard: &mut ChannelState, next: ConnectionState) {
        if guard.state == next {
            return;
        }
        debug!(from = %guard.state, to = %next, "dispatch: connection state changed");
        guard.state = next;
        let _ = self.events.send(ClientEvent::ConnectionStateChanged(next));
    }
}

async fn write_request(
    guard: &mut ChannelState,
    request: &ClientRequest,
) -> Result<(), ClientError> {
    let text = serde_json::to_string(request)?;
    let sink = guard
        .sink
        .as_mut()
        .ok_or(ClientError::NotConnected(guard.state))?;
    sink.send_text(text)
        .await
        .map_err(|err| ClientError::Transport(format!("{err:#}")))?;
    debug!(action = request.action(), "dispatch: request sent");
    Ok(())
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
