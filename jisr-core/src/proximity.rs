//! Location permission lifecycle and live distance to the point of interest.
//!
//! The platform side (permission prompts, the positioning subsystem) sits
//! behind [`LocationPlatform`]. Everything the platform reports comes back
//! as a [`LocationEvent`] through one channel and is applied by
//! [`ProximityManager::handle_event`], in arrival order.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    config::ProximityConfig,
    error::ProximityError,
    geo::{Coordinate, haversine_km},
    model::{Authorization, PositionFix, ProximityState},
};

const AUTHORIZATION_CHANNEL_CAPACITY: usize = 16;

/// How position fixes are requested once permission is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Keep the stream running until denial or teardown.
    #[default]
    Continuous,
    /// Stop after the first good fix; [`ProximityManager::refresh`] asks for another.
    SingleShot,
}

/// The platform's answer to a permission prompt, or a later change made in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationDecision {
    Granted,
    Denied,
}

/// Everything the platform reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Authorization(AuthorizationDecision),
    Fix(Coordinate),
    FixFailed(String),
}

pub type LocationEventSender = mpsc::UnboundedSender<LocationEvent>;
pub type LocationEventReceiver = mpsc::UnboundedReceiver<LocationEvent>;

/// Channel the platform uses to report [`LocationEvent`]s.
pub fn event_channel() -> (LocationEventSender, LocationEventReceiver) {
    mpsc::unbounded_channel()
}

/// Broadcast whenever authorization changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationChange {
    pub from: Authorization,
    pub to: Authorization,
}

/// Permission prompts and the positioning subsystem.
///
/// Implementations must not block; results come back as [`LocationEvent`]s.
pub trait LocationPlatform: Send + Sync + Debug {
    fn request_authorization(&self);
    fn start_updates(&self, mode: UpdateMode);
    fn stop_updates(&self);
}

/// Display text for a known distance: the arrived message below the
/// threshold, otherwise the distance to one decimal place.
pub fn display_text(distance_km: f64, threshold_km: f64, arrived_message: &str) -> String {
    if distance_km < threshold_km {
        arrived_message.to_string()
    } else {
        format!("{distance_km:.1} km")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    None,
    Start,
    Stop,
}

/// Tracks location permission and distance to a fixed target.
#[derive(Debug)]
pub struct ProximityManager {
    platform: Arc<dyn LocationPlatform>,
    settings: ProximityConfig,
    state: watch::Sender<ProximityState>,
    authorization: broadcast::Sender<AuthorizationChange>,
    streaming: AtomicBool,
}

impl ProximityManager {
    /// Create the manager and issue the permission prompt.
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        target: Coordinate,
        settings: ProximityConfig,
    ) -> Self {
        let (state, _) = watch::channel(ProximityState::new(target, settings.pending_message.clone()));
        let (authorization, _) = broadcast::channel(AUTHORIZATION_CHANNEL_CAPACITY);

        let manager = Self {
            platform,
            settings,
            state,
            authorization,
            streaming: AtomicBool::new(false),
        };
        manager.request_authorization();
        manager
    }

    fn request_authorization(&self) {
        self.transition(Authorization::Requested, |_| {});
        info!("requesting location permission");
        self.platform.request_authorization();
    }

    /// Read-only view of the published state.
    pub fn state(&self) -> watch::Receiver<ProximityState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ProximityState {
        self.state.borrow().clone()
    }

    pub fn subscribe_authorization(&self) -> broadcast::Receiver<AuthorizationChange> {
        self.authorization.subscribe()
    }

    pub fn target(&self) -> Coordinate {
        self.state.borrow().target
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Apply one platform event.
    pub fn handle_event(&self, event: LocationEvent) {
        let effect = match event {
            LocationEvent::Authorization(decision) => self.on_authorization(decision),
            LocationEvent::Fix(coordinate) => self.on_fix(coordinate),
            LocationEvent::FixFailed(reason) => self.on_fix_failed(reason),
        };
        self.apply(effect);
    }

    /// Handle events until every sender is dropped.
    pub async fn run(&self, mut events: LocationEventReceiver) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("location event channel closed");
    }

    /// Handle whatever is already queued without waiting. Returns how many events were handled.
    pub fn drain(&self, events: &mut LocationEventReceiver) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Ask for one more fix. Only meaningful in single-shot mode while granted.
    pub fn refresh(&self) {
        if self.state.borrow().authorization != Authorization::Granted {
            debug!("refresh ignored: location not granted");
            return;
        }
        if !self.is_streaming() {
            self.apply(Effect::Start);
        }
    }

    /// Stop any active position stream.
    pub fn shutdown(&self) {
        self.apply(Effect::Stop);
    }

    fn on_authorization(&self, decision: AuthorizationDecision) -> Effect {
        let current = self.state.borrow().authorization;
        match (current, decision) {
            (Authorization::Granted, AuthorizationDecision::Granted) => Effect::None,
            (Authorization::Denied, AuthorizationDecision::Granted) => {
                // Denied is final for the session.
                debug!("ignoring grant after denial");
                Effect::None
            }
            (Authorization::Denied, AuthorizationDecision::Denied) => Effect::None,
            (_, AuthorizationDecision::Granted) => {
                let pending = self.settings.pending_message.clone();
                self.transition(Authorization::Granted, move |state| {
                    state.display_text = pending;
                    state.last_error = None;
                });
                Effect::Start
            }
            (_, AuthorizationDecision::Denied) => {
                let unavailable = self.settings.unavailable_message.clone();
                self.transition(Authorization::Denied, move |state| {
                    state.position = None;
                    state.display_text = unavailable;
                    state.last_error = Some(ProximityError::PermissionDenied);
                });
                Effect::Stop
            }
        }
    }

    fn on_fix(&self, coordinate: Coordinate) -> Effect {
        if let Err(err) = coordinate.validate() {
            return self.on_fix_failed(err.to_string());
        }

        let mut applied = false;
        self.state.send_if_modified(|state| {
            if state.authorization != Authorization::Granted {
                return false;
            }
            let distance_km = haversine_km(coordinate, state.target);
            state.position = Some(PositionFix { coordinate, distance_km });
            state.display_text = display_text(
                distance_km,
                self.settings.arrival_threshold_km,
                &self.settings.arrived_message,
            );
            state.last_error = None;
            applied = true;
            true
        });

        if !applied {
            debug!("ignoring position fix: location not granted");
            return Effect::None;
        }
        debug!(%coordinate, "position fix applied");

        match self.settings.update_mode {
            UpdateMode::SingleShot => Effect::Stop,
            UpdateMode::Continuous => Effect::None,
        }
    }

    fn on_fix_failed(&self, reason: String) -> Effect {
        let error_message = self.settings.error_message.clone();
        let recorded = self.state.send_if_modified(|state| {
            if state.authorization != Authorization::Granted {
                return false;
            }
            // The last good position stays; only the text changes.
            state.display_text = error_message;
            state.last_error = Some(ProximityError::Fix(reason.clone()));
            true
        });

        if recorded {
            warn!(%reason, "position fix failed");
        } else {
            debug!(%reason, "ignoring fix failure: location not granted");
        }
        Effect::None
    }

    fn transition(&self, to: Authorization, update: impl FnOnce(&mut ProximityState)) {
        let mut from = to;
        self.state.send_modify(|state| {
            from = state.authorization;
            state.authorization = to;
            update(state);
        });

        if from != to {
            info!(%from, %to, "location authorization changed");
            // No subscribers is fine.
            let _ = self.authorization.send(AuthorizationChange { from, to });
        }
    }

    fn apply(&self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Start => {
                if !self.streaming.swap(true, Ordering::SeqCst) {
                    debug!(mode = ?self.settings.update_mode, "starting position updates");
                    self.platform.start_updates(self.settings.update_mode);
                }
            }
            Effect::Stop => {
                if self.streaming.swap(false, Ordering::SeqCst) {
                    debug!("stopping position updates");
                    self.platform.stop_updates();
                }
            }
        }
    }
}

impl Drop for ProximityManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
