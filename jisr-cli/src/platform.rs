use jisr_core::{
    Coordinate, LocationPlatform,
    proximity::{AuthorizationDecision, LocationEvent, LocationEventSender, UpdateMode},
};
use tracing::debug;

/// Stands in for the device's permission prompt and positioning subsystem.
///
/// Answers the prompt with a fixed decision and reports `fix` (if any)
/// whenever updates are started.
#[derive(Debug)]
pub struct SimulatedPlatform {
    events: LocationEventSender,
    decision: AuthorizationDecision,
    fix: Option<Coordinate>,
}

impl SimulatedPlatform {
    pub fn new(
        events: LocationEventSender,
        decision: AuthorizationDecision,
        fix: Option<Coordinate>,
    ) -> Self {
        Self { events, decision, fix }
    }
}

impl LocationPlatform for SimulatedPlatform {
    fn request_authorization(&self) {
        debug!(decision = ?self.decision, "simulated permission prompt");
        let _ = self.events.send(LocationEvent::Authorization(self.decision));
    }

    fn start_updates(&self, mode: UpdateMode) {
        debug!(?mode, "simulated position updates started");
        let event = match self.fix {
            Some(coordinate) => LocationEvent::Fix(coordinate),
            None => LocationEvent::FixFailed("no position supplied".to_string()),
        };
        let _ = self.events.send(event);
    }

    fn stop_updates(&self) {
        debug!("simulated position updates stopped");
    }
}
