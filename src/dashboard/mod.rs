//! Operator dashboard.
//!
//! Holds the view state of the console (live stack, history, pulse flag,
//! map focus, error panel, live links) and turns inbound `emergency`
//! frames into notifications. Everything runs on one task; timers and HTTP
//! requests are spawned and report back as `DashboardCommand`s, and every
//! one of them is aborted on `shutdown`.

pub mod alert;
pub mod console;
pub mod live;
pub mod map;
pub mod notification;
pub mod stops;

pub use alert::{render_alert_tone, start_alert, AlertSession, AudioError, AudioOutput, BellOutput};
pub use console::parse_console_line;
pub use live::{LinkError, LiveLink, LiveLinkStatus};
pub use map::{CallbackId, LoggingSurface, MapFocus, MapSurface, MapView, MarkerAction};
pub use notification::{Notification, NotificationOrigin, NotificationStore};
pub use stops::{fetch_stops, BusStop, StopDirectory};

use crate::channel::{ChannelConfig, ChannelHandle, ChannelState, Connector, WsConnector};
use crate::config::{DashboardConfig, DisplayPreferences, PreferenceStore, SharedPreferences};
use crate::event::{validate_emergency, EmergencyReport, InboundEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on the stop-list and simulate requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the connector for a kiosk admin endpoint
pub type LinkConnectorFactory = Arc<dyn Fn(&str) -> Arc<dyn Connector> + Send + Sync>;

/// Work delivered to the dashboard task
#[derive(Debug)]
pub enum DashboardCommand {
    /// Operator dismissed a live-stack entry
    Dismiss(Uuid),
    /// Auto-dismiss timer fired
    Expire(Uuid),
    /// Pulse timer fired for the given generation
    ClearPulse(u64),
    /// Operator clicked a marker; dispatched through the map's callbacks
    ClickMarker(MarkerAction),
    /// A map callback reported a marker action
    Marker(MarkerAction),
    /// Simulate request finished (successfully or not)
    SimulationSent { stop_id: u64, delivered: bool },
    Link { stop_id: u64, event: InboundEvent },
    ClearHistory,
    /// Log the history view
    ShowHistory,
    SetHistoryVisible(bool),
    SetSound(bool),
    SavePreferences,
    OpenLink(u64),
    RequestVideo(u64),
    EndVideo(u64),
    AdminMessage { stop_id: u64, content: String },
    Shutdown,
}

struct LinkEntry {
    link: LiveLink,
    forward: JoinHandle<()>,
}

pub struct Dashboard {
    settings: DashboardConfig,
    preferences: SharedPreferences,
    preference_store: Option<PreferenceStore>,
    store: NotificationStore,
    directory: StopDirectory,
    map: MapView,
    marker_callback: CallbackId,
    audio: Arc<dyn AudioOutput>,
    alert: Option<AlertSession>,
    http_client: reqwest::Client,
    pulse_duration: Duration,
    emergency_active: bool,
    pulse_generation: u64,
    pulse_timer: Option<JoinHandle<()>>,
    dismiss_timers: HashMap<Uuid, JoinHandle<()>>,
    requests: Vec<JoinHandle<()>>,
    error_panel: Option<String>,
    channel_state: ChannelState,
    link_connector: LinkConnectorFactory,
    links: HashMap<u64, LinkEntry>,
    commands_tx: mpsc::UnboundedSender<DashboardCommand>,
}

impl Dashboard {
    pub fn new(
        config: &DashboardConfig,
        preferences: SharedPreferences,
        surface: Box<dyn MapSurface>,
        audio: Arc<dyn AudioOutput>,
    ) -> (Self, mpsc::UnboundedReceiver<DashboardCommand>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let mut map = MapView::new(surface, config.focus_zoom);
        let marker_tx = commands_tx.clone();
        let marker_callback = map.register(Box::new(move |action| {
            let _ = marker_tx.send(DashboardCommand::Marker(action));
        }));

        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
                reqwest::Client::new()
            });

        let mut dashboard = Self {
            settings: config.clone(),
            preferences,
            preference_store: None,
            store: NotificationStore::new(config.stack_capacity),
            directory: StopDirectory::default(),
            map,
            marker_callback,
            audio,
            alert: None,
            http_client,
            pulse_duration: Duration::from_millis(config.pulse_duration_ms),
            emergency_active: false,
            pulse_generation: 0,
            pulse_timer: None,
            dismiss_timers: HashMap::new(),
            requests: Vec::new(),
            error_panel: None,
            channel_state: ChannelState::Idle,
            link_connector: Arc::new(|url: &str| -> Arc<dyn Connector> {
                Arc::new(WsConnector::new(url.to_string()))
            }),
            links: HashMap::new(),
            commands_tx,
        };
        let labels = dashboard.current_preferences().show_stop_labels;
        dashboard.map.set_labels_visible(labels);
        (dashboard, commands_rx)
    }

    /// Replace how live-link connectors are built.
    pub fn with_link_connector(mut self, factory: LinkConnectorFactory) -> Self {
        self.link_connector = factory;
        self
    }

    /// Sender for operator input (dismiss, marker actions, shutdown).
    pub fn commands(&self) -> mpsc::UnboundedSender<DashboardCommand> {
        self.commands_tx.clone()
    }

    /// Where `save_preferences` writes.
    pub fn with_preference_store(mut self, store: PreferenceStore) -> Self {
        self.preference_store = Some(store);
        self
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.store
    }

    /// History as the operator sees it: empty while the view is hidden.
    pub fn history_view(&self) -> Vec<&Notification> {
        if self.current_preferences().show_history {
            self.store.history().collect()
        } else {
            Vec::new()
        }
    }

    pub fn directory(&self) -> &StopDirectory {
        &self.directory
    }

    pub fn map(&self) -> &MapView {
        &self.map
    }

    pub fn emergency_active(&self) -> bool {
        self.emergency_active
    }

    pub fn alert_playing(&self) -> bool {
        self.alert.as_ref().map_or(false, AlertSession::is_playing)
    }

    pub fn error_panel(&self) -> Option<&str> {
        self.error_panel.as_deref()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
    }

    /// Auto-dismiss and pulse timers still pending
    pub fn pending_timers(&self) -> usize {
        self.dismiss_timers.len() + usize::from(self.pulse_timer.is_some())
    }

    pub fn link(&self, stop_id: u64) -> Option<&LiveLink> {
        self.links.get(&stop_id).map(|entry| &entry.link)
    }

    fn current_preferences(&self) -> DisplayPreferences {
        match self.preferences.read() {
            Ok(prefs) => prefs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Change display preferences; takes effect for the next notification.
    pub fn update_preferences(&mut self, update: impl FnOnce(&mut DisplayPreferences)) {
        let labels = {
            let mut prefs = match self.preferences.write() {
                Ok(prefs) => prefs,
                Err(poisoned) => poisoned.into_inner(),
            };
            update(&mut prefs);
            prefs.show_stop_labels
        };
        self.map.set_labels_visible(labels);
    }

    /// Persist the current preferences. Failures land on the error panel.
    pub fn save_preferences(&mut self) -> bool {
        let prefs = self.current_preferences();
        let result = match &self.preference_store {
            Some(store) => store.save(&prefs),
            None => {
                warn!("No preference store configured, preferences not saved");
                return false;
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to save preferences");
                self.report_error(format!("Could not save settings: {:#}", e));
                false
            }
        }
    }

    /// Install the stop list and place its markers.
    pub fn set_directory(&mut self, directory: StopDirectory) {
        self.map.show_stops(directory.all());
        self.directory = directory;
    }

    /// Fetch the stop list once. On failure the error panel says so and the
    /// dashboard keeps working with an empty directory.
    pub async fn load_stops(&mut self) -> bool {
        match fetch_stops(&self.http_client, &self.settings.stops_url).await {
            Ok(directory) => {
                self.set_directory(directory);
                true
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to load bus stops");
                self.report_error(format!("Could not load bus stops: {:#}", e));
                false
            }
        }
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.error_panel = Some(message.into());
    }

    pub fn dismiss_error(&mut self) {
        self.error_panel = None;
    }

    pub fn on_channel_state(&mut self, state: ChannelState) {
        if state == self.channel_state {
            return;
        }
        match state {
            ChannelState::Open => info!("Emergency feed connected"),
            ChannelState::Closed | ChannelState::Connecting
                if self.channel_state == ChannelState::Open =>
            {
                warn!("Emergency feed lost, reconnecting")
            }
            _ => debug!(state = %state, "Emergency feed state"),
        }
        self.channel_state = state;
    }

    /// Dispatch one frame from the emergency feed.
    pub fn handle_event(&mut self, event: InboundEvent) -> Option<Uuid> {
        match event {
            InboundEvent::Emergency(report) => self.on_emergency(report, NotificationOrigin::Relay),
            InboundEvent::Ping | InboundEvent::Pong => None,
            other => {
                debug!(kind = other.kind(), "Event not addressed to dashboard, ignored");
                None
            }
        }
    }

    /// Returns false once the dashboard should stop.
    pub fn handle_command(&mut self, command: DashboardCommand) -> bool {
        match command {
            DashboardCommand::Dismiss(id) => {
                self.dismiss(id);
            }
            DashboardCommand::Expire(id) => {
                self.dismiss_timers.remove(&id);
                if self.store.dismiss(id).is_some() {
                    debug!(id = %id, "Notification expired");
                }
            }
            DashboardCommand::ClearPulse(generation) => {
                // A newer emergency restarted the pulse
                if generation == self.pulse_generation {
                    self.emergency_active = false;
                    self.pulse_timer = None;
                }
            }
            DashboardCommand::ClickMarker(action) => {
                if self.map.marker_clicked(action) == 0 {
                    warn!(stop_id = action.stop_id(), "Marker click with no listener");
                }
            }
            DashboardCommand::Marker(MarkerAction::Select(stop_id)) => self.select_stop(stop_id),
            DashboardCommand::Marker(MarkerAction::SimulateEmergency(stop_id)) => {
                self.simulate(stop_id)
            }
            DashboardCommand::SimulationSent { stop_id, delivered } => {
                debug!(stop_id = stop_id, delivered = delivered, "Simulation finished");
                let report = EmergencyReport {
                    stop_id,
                    stop_name: None,
                    lat: None,
                    lng: None,
                    timestamp: None,
                };
                self.on_emergency(report, NotificationOrigin::Simulated);
            }
            DashboardCommand::Link { stop_id, event } => {
                let error = match self.links.get_mut(&stop_id) {
                    Some(entry) => entry.link.handle_event(event),
                    None => None,
                };
                if let Some(message) = error {
                    self.report_error(format!("Stop {}: {}", stop_id, message));
                }
            }
            DashboardCommand::ClearHistory => self.clear_history(),
            DashboardCommand::ShowHistory => self.log_history(),
            DashboardCommand::SetHistoryVisible(visible) => {
                self.update_preferences(|prefs| prefs.show_history = visible);
                info!(show_history = visible, "History view preference changed");
            }
            DashboardCommand::SetSound(enabled) => {
                self.update_preferences(|prefs| prefs.sound_enabled = enabled);
                info!(sound_enabled = enabled, "Alert sound preference changed");
            }
            DashboardCommand::SavePreferences => {
                self.save_preferences();
            }
            // Link failures are already on the error panel
            DashboardCommand::OpenLink(stop_id) => {
                let _ = self.open_link(stop_id);
            }
            DashboardCommand::RequestVideo(stop_id) => {
                let _ = self.request_video(stop_id);
            }
            DashboardCommand::EndVideo(stop_id) => {
                let _ = self.end_video(stop_id);
            }
            DashboardCommand::AdminMessage { stop_id, content } => {
                let _ = self.send_admin_message(stop_id, &content);
            }
            DashboardCommand::Shutdown => return false,
        }
        true
    }

    /// Remove a live-stack entry and cancel its timer.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        if let Some(timer) = self.dismiss_timers.remove(&id) {
            timer.abort();
        }
        self.store.dismiss(id).is_some()
    }

    pub fn clear_history(&mut self) {
        self.store.clear_history();
        info!("Notification history cleared");
    }

    fn log_history(&self) {
        if !self.current_preferences().show_history {
            info!("History view is hidden");
            return;
        }
        let history = self.history_view();
        info!(entries = history.len(), "Notification history");
        for n in history {
            info!(
                id = %n.id,
                stop_id = n.stop_id,
                timestamp = %n.timestamp.to_rfc3339(),
                live = self.store.is_live(n.id),
                "{}",
                n.message
            );
        }
    }

    pub fn select_stop(&mut self, stop_id: u64) {
        match self.directory.get(stop_id) {
            Some(stop) => {
                let stop = stop.clone();
                self.map.select(&stop);
            }
            None => warn!(stop_id = stop_id, "Selected stop not in directory"),
        }
    }

    fn on_emergency(&mut self, report: EmergencyReport, origin: NotificationOrigin) -> Option<Uuid> {
        if let Err(e) = validate_emergency(&report) {
            warn!(stop_id = report.stop_id, error = %e, "Emergency rejected");
            return None;
        }

        let stop = self.directory.get(report.stop_id);
        let stop_name = report
            .stop_name
            .clone()
            .or_else(|| stop.map(|s| s.name.clone()))
            .unwrap_or_else(|| format!("Stop {}", report.stop_id));
        let coordinates = report
            .lat
            .zip(report.lng)
            .or_else(|| stop.map(|s| (s.lat, s.lng)));
        let timestamp = report
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let notification = Notification::new(report.stop_id, stop_name, coordinates, timestamp, origin);
        Some(self.notify(notification))
    }

    fn notify(&mut self, notification: Notification) -> Uuid {
        let id = notification.id;
        let prefs = self.current_preferences();
        info!(
            id = %id,
            stop_id = notification.stop_id,
            stop_name = %notification.stop_name,
            "{}",
            notification.message
        );

        let coordinates = notification.coordinates();
        if let Some(evicted) = self.store.insert(notification) {
            if let Some(timer) = self.dismiss_timers.remove(&evicted.id) {
                timer.abort();
            }
        }

        self.pulse_generation += 1;
        self.emergency_active = true;
        if let Some(timer) = self.pulse_timer.take() {
            timer.abort();
        }
        self.pulse_timer = Some(self.schedule(
            self.pulse_duration,
            DashboardCommand::ClearPulse(self.pulse_generation),
        ));

        if prefs.sound_enabled {
            // Replacing the session stops the previous tone
            self.alert = None;
            match start_alert(self.audio.as_ref(), prefs.volume()) {
                Ok(session) => self.alert = Some(session),
                Err(e) => {
                    warn!(error = %e, "Alert tone not played");
                    self.report_error(format!("Alert sound unavailable: {}", e));
                }
            }
        }

        if let Some((lat, lng)) = coordinates {
            self.map.focus_on(lat, lng);
        }

        if let Some(delay) = prefs.auto_dismiss() {
            let timer = self.schedule(delay, DashboardCommand::Expire(id));
            self.dismiss_timers.insert(id, timer);
        }

        id
    }

    fn schedule(&self, delay: Duration, command: DashboardCommand) -> JoinHandle<()> {
        let tx = self.commands_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command);
        })
    }

    /// POST to the simulate endpoint, then raise a local notification
    /// whatever the outcome.
    fn simulate(&mut self, stop_id: u64) {
        let url = format!(
            "{}/{}",
            self.settings.simulate_url.trim_end_matches('/'),
            stop_id
        );
        let client = self.http_client.clone();
        let tx = self.commands_tx.clone();
        info!(stop_id = stop_id, url = %url, "Simulating emergency");

        self.requests.retain(|request| !request.is_finished());
        self.requests.push(tokio::spawn(async move {
            let delivered = match client.post(&url).send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => true,
                Err(e) => {
                    warn!(stop_id = stop_id, error = %e, "Simulate request failed");
                    false
                }
            };
            let _ = tx.send(DashboardCommand::SimulationSent { stop_id, delivered });
        }));
    }

    /// Open the admin link to the kiosk at a stop. Reopening is a no-op.
    pub fn open_link(&mut self, stop_id: u64) -> Result<(), LinkError> {
        if self.links.contains_key(&stop_id) {
            return Ok(());
        }
        let url = match self.settings.device_link(stop_id) {
            Some(link) => link.admin_url.clone(),
            None => {
                let err = LinkError::NotConfigured(stop_id);
                self.report_error(err.to_string());
                return Err(err);
            }
        };

        let connector = (self.link_connector)(&url);
        let config = ChannelConfig {
            url,
            ..self.settings.channel.clone()
        };
        let (link, mut inbound_rx) = LiveLink::open(stop_id, config, connector);

        let tx = self.commands_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                if tx.send(DashboardCommand::Link { stop_id, event }).is_err() {
                    break;
                }
            }
        });
        self.links.insert(stop_id, LinkEntry { link, forward });
        Ok(())
    }

    /// Ask the kiosk at a stop to join a live video link.
    pub fn request_video(&mut self, stop_id: u64) -> Result<(), LinkError> {
        let result = self.link_mut(stop_id).and_then(|link| link.request_connect());
        self.surface_link_error(result)
    }

    pub fn end_video(&mut self, stop_id: u64) -> Result<(), LinkError> {
        let result = self.link_mut(stop_id).and_then(|link| link.disconnect());
        self.surface_link_error(result)
    }

    pub fn send_admin_message(&mut self, stop_id: u64, content: &str) -> Result<(), LinkError> {
        let result = self.link_mut(stop_id).and_then(|link| link.send_message(content));
        self.surface_link_error(result)
    }

    pub async fn close_link(&mut self, stop_id: u64) -> bool {
        match self.links.remove(&stop_id) {
            Some(entry) => {
                entry.forward.abort();
                entry.link.shutdown().await;
                true
            }
            None => false,
        }
    }

    fn link_mut(&mut self, stop_id: u64) -> Result<&mut LiveLink, LinkError> {
        self.links
            .get_mut(&stop_id)
            .map(|entry| &mut entry.link)
            .ok_or(LinkError::NotOpen(stop_id))
    }

    fn surface_link_error(&mut self, result: Result<(), LinkError>) -> Result<(), LinkError> {
        if let Err(e) = &result {
            warn!(error = %e, "Live link request failed");
            self.report_error(e.to_string());
        }
        result
    }

    /// Event loop over the emergency feed and local commands.
    pub async fn run(
        mut self,
        channel: ChannelHandle,
        mut inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
        mut commands_rx: mpsc::UnboundedReceiver<DashboardCommand>,
    ) {
        let mut state_rx = channel.subscribe_state();
        let initial = *state_rx.borrow_and_update();
        self.on_channel_state(initial);
        info!(stops = self.directory.len(), "Dashboard running");

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        warn!("Channel state stream ended");
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    self.on_channel_state(state);
                }
                Some(event) = inbound_rx.recv() => {
                    self.handle_event(event);
                }
                command = commands_rx.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.shutdown().await;
        channel.shutdown().await;
    }

    /// Cancel every timer, request and live link.
    pub async fn shutdown(mut self) {
        let timers = self.dismiss_timers.len();
        for (_, timer) in self.dismiss_timers.drain() {
            timer.abort();
        }
        if let Some(timer) = self.pulse_timer.take() {
            timer.abort();
        }
        for request in self.requests.drain(..) {
            request.abort();
        }
        if let Some(mut alert) = self.alert.take() {
            alert.stop();
        }
        for (_, entry) in self.links.drain() {
            entry.forward.abort();
            entry.link.shutdown().await;
        }
        self.map.unregister(self.marker_callback);
        info!(cancelled_timers = timers, "Dashboard shut down");
    }
}
