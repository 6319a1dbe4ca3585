use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationState {
    Stopped,
    RequestingPermission,
    Active,
    Paused,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationOptions {
    pub interval_ms: u64,
    pub high_accuracy: bool,
    pub once: bool,
}

impl LocationOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            interval_ms: config.location_interval_ms,
            high_accuracy: config.location_high_accuracy,
            once: config.location_once,
        }
    }
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationUpdate {
    Fix(LocationFix),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationEvent {
    pub generation: u64,
    pub update: LocationUpdate,
}

#[derive(Debug, Clone)]
pub struct LocationSink {
    generation: u64,
    tx: UnboundedSender<LocationEvent>,
}

impl LocationSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn fix(&self, lat: f64, lng: f64, accuracy_m: Option<f32>) -> bool {
        self.send(LocationUpdate::Fix(LocationFix {
            lat,
            lng,
            accuracy_m,
        }))
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(LocationUpdate::Error(message.into()))
    }

    fn send(&self, update: LocationUpdate) -> bool {
        self.tx
            .send(LocationEvent {
                generation: self.generation,
                update,
            })
            .is_ok()
    }
}

pub trait LocationProvider: Send {
    fn start(&mut self, options: &LocationOptions, sink: LocationSink) -> AppResult<()>;
    fn stop(&mut self);
}

/// Every transition out of `Active` bumps the generation, so events the old
/// subscription sends late are ignored.
pub struct LocationCoordinator {
    provider: Box<dyn LocationProvider>,
    options: LocationOptions,
    state: LocationState,
    generation: u64,
    tx: UnboundedSender<LocationEvent>,
    error_reported: bool,
}

impl LocationCoordinator {
    pub fn new(
        provider: Box<dyn LocationProvider>,
        options: LocationOptions,
    ) -> (Self, UnboundedReceiver<LocationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            provider,
            options,
            state: LocationState::Stopped,
            generation: 0,
            tx,
            error_reported: false,
        };
        (coordinator, rx)
    }

    pub fn state(&self) -> LocationState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn options(&self) -> &LocationOptions {
        &self.options
    }

    pub fn request_permission(&mut self) -> LocationState {
        match self.state {
            LocationState::Stopped => self.state = LocationState::RequestingPermission,
            LocationState::Denied => debug!("permission previously denied; waiting for user retry"),
            _ => {}
        }
        self.state
    }

    pub fn on_permission_result(&mut self, granted: bool) -> AppResult<LocationState> {
        if self.state != LocationState::RequestingPermission {
            debug!(state = ?self.state, "ignoring permission result outside request");
            return Ok(self.state);
        }
        if !granted {
            info!("location permission denied");
            self.state = LocationState::Denied;
            return Err(AppError::PermissionDenied);
        }
        self.activate()?;
        Ok(self.state)
    }

    pub fn retry_permission(&mut self) -> LocationState {
        if self.state == LocationState::Denied {
            self.state = LocationState::RequestingPermission;
        }
        self.state
    }

    pub fn pause(&mut self) -> LocationState {
        if self.state == LocationState::Active {
            self.unsubscribe();
            self.state = LocationState::Paused;
        }
        self.state
    }

    pub fn resume(&mut self) -> AppResult<LocationState> {
        if self.state == LocationState::Paused {
            self.activate()?;
        }
        Ok(self.state)
    }

    pub fn stop(&mut self) -> LocationState {
        if self.state == LocationState::Active {
            self.unsubscribe();
        } else {
            self.generation += 1;
        }
        self.state = LocationState::Stopped;
        self.state
    }

    pub fn accept<'a>(&mut self, event: &'a LocationEvent) -> Option<&'a LocationUpdate> {
        if self.state != LocationState::Active || event.generation != self.generation {
            debug!(
                event_generation = event.generation,
                generation = self.generation,
                "discarding location event from stale subscription"
            );
            return None;
        }
        if let LocationUpdate::Fix(_) = event.update {
            self.error_reported = false;
        }
        Some(&event.update)
    }

    // First error since the subscription started or since the last valid fix.
    pub fn should_report_error(&mut self) -> bool {
        !std::mem::replace(&mut self.error_reported, true)
    }

    fn activate(&mut self) -> AppResult<()> {
        self.generation += 1;
        self.error_reported = false;
        let sink = LocationSink {
            generation: self.generation,
            tx: self.tx.clone(),
        };
        if let Err(err) = self.provider.start(&self.options, sink) {
            warn!(?err, "location provider failed to start");
            self.generation += 1;
            self.state = LocationState::Stopped;
            return Err(err);
        }
        self.state = LocationState::Active;
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.provider.stop();
        self.generation += 1;
    }
}
