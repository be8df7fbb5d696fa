//! Map view. Rendering is delegated to a `MapSurface`; marker clicks reach
//! the dashboard only through registered callbacks.

use super::stops::BusStop;
use tracing::{debug, info};

/// Center and zoom requested from the surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapFocus {
    pub lat: f64,
    pub lng: f64,
    pub zoom: u8,
}

/// Action offered by a stop marker's overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerAction {
    Select(u64),
    SimulateEmergency(u64),
}

impl MarkerAction {
    pub fn stop_id(&self) -> u64 {
        match self {
            MarkerAction::Select(id) | MarkerAction::SimulateEmergency(id) => *id,
        }
    }
}

/// External map SDK seam
pub trait MapSurface: Send {
    fn show_stops(&mut self, stops: &[BusStop]);
    /// Re-center and zoom. Easing is up to the surface.
    fn focus(&mut self, focus: MapFocus);
    fn set_labels_visible(&mut self, visible: bool);
}

/// Surface that only logs what it would draw
#[derive(Debug, Default)]
pub struct LoggingSurface;

impl MapSurface for LoggingSurface {
    fn show_stops(&mut self, stops: &[BusStop]) {
        info!(count = stops.len(), "Map markers placed");
    }

    fn focus(&mut self, focus: MapFocus) {
        info!(lat = focus.lat, lng = focus.lng, zoom = focus.zoom, "Map focused");
    }

    fn set_labels_visible(&mut self, visible: bool) {
        debug!(visible = visible, "Map labels toggled");
    }
}

pub type MarkerCallback = Box<dyn Fn(MarkerAction) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub struct MapView {
    surface: Box<dyn MapSurface>,
    focus_zoom: u8,
    focus: Option<MapFocus>,
    selected: Option<u64>,
    callbacks: Vec<(CallbackId, MarkerCallback)>,
    next_callback: u64,
}

impl MapView {
    pub fn new(surface: Box<dyn MapSurface>, focus_zoom: u8) -> Self {
        Self {
            surface,
            focus_zoom,
            focus: None,
            selected: None,
            callbacks: Vec::new(),
            next_callback: 0,
        }
    }

    pub fn show_stops(&mut self, stops: &[BusStop]) {
        self.surface.show_stops(stops);
    }

    pub fn set_labels_visible(&mut self, visible: bool) {
        self.surface.set_labels_visible(visible);
    }

    /// Center on a position at the configured incident zoom.
    pub fn focus_on(&mut self, lat: f64, lng: f64) {
        let focus = MapFocus {
            lat,
            lng,
            zoom: self.focus_zoom,
        };
        self.focus = Some(focus);
        self.surface.focus(focus);
    }

    pub fn select(&mut self, stop: &BusStop) {
        self.selected = Some(stop.id);
        self.focus_on(stop.lat, stop.lng);
    }

    /// Last focus request, if any
    pub fn focus(&self) -> Option<MapFocus> {
        self.focus
    }

    pub fn selected(&self) -> Option<u64> {
        self.selected
    }

    pub fn register(&mut self, callback: MarkerCallback) -> CallbackId {
        let id = CallbackId(self.next_callback);
        self.next_callback += 1;
        self.callbacks.push((id, callback));
        id
    }

    pub fn unregister(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cb_id, _)| *cb_id != id);
        self.callbacks.len() != before
    }

    /// Marker overlay clicked. Every registered callback sees the action.
    pub fn marker_clicked(&self, action: MarkerAction) -> usize {
        debug!(stop_id = action.stop_id(), listeners = self.callbacks.len(), "Marker clicked");
        for (_, callback) in &self.callbacks {
            callback(action);
        }
        self.callbacks.len()
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Surface that records every request, for assertions
    #[derive(Debug, Default)]
    pub struct Recorded {
        pub stops: usize,
        pub focus: Vec<MapFocus>,
        pub labels: Option<bool>,
    }

    pub struct RecordingSurface(pub Arc<Mutex<Recorded>>);

    impl RecordingSurface {
        pub fn new() -> (Box<Self>, Arc<Mutex<Recorded>>) {
            let recorded = Arc::new(Mutex::new(Recorded::default()));
            (Box::new(Self(recorded.clone())), recorded)
        }
    }

    impl MapSurface for RecordingSurface {
        fn show_stops(&mut self, stops: &[BusStop]) {
            self.0.lock().unwrap().stops = stops.len();
        }

        fn focus(&mut self, focus: MapFocus) {
            self.0.lock().unwrap().focus.push(focus);
        }

        fn set_labels_visible(&mut self, visible: bool) {
            self.0.lock().unwrap().labels = Some(visible);
        }
    }
}
