use crate::error::SessionError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Connection lifecycle of a remote conversational session.
///
/// Exactly one `SessionClient` owns a given cell; transitions are serialized
/// through [`SessionStateCell::transition`] and validated against the table
/// below, so an impossible hop (e.g. `Open -> Connecting`) is a bug surfaced
/// as an error, not silently absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Failed,
}

pub struct SessionStateCell {
    state: Arc<RwLock<SessionState>>,
    state_tx: Sender<SessionState>,
    state_rx: Receiver<SessionState>,
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(SessionState::Idle)),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: SessionState) -> Result<(), SessionError> {
        use SessionState::*;
        let mut current = self.state.write();

        let valid = matches!(
            (*current, new_state),
            // A connect attempt may start from any resting state.
            (Idle, Connecting)
                | (Closed, Connecting)
                | (Failed, Connecting)
                | (Reconnecting, Connecting)
                // Attempt outcomes.
                | (Connecting, Open)
                | (Connecting, Reconnecting)
                | (Connecting, Failed)
                | (Connecting, Closed)
                // A live session drops or is torn down.
                | (Open, Reconnecting)
                | (Open, Closed)
                // Between attempts the caller may give up or bail out.
                | (Reconnecting, Failed)
                | (Reconnecting, Closed)
                | (Idle, Closed)
                | (Failed, Closed)
        );

        if !valid {
            return Err(SessionError::InvalidTransition {
                from: *current,
                to: new_state,
            });
        }

        tracing::debug!("Session state: {:?} -> {:?}", *current, new_state);
        *current = new_state;
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    pub fn current(&self) -> SessionState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> Receiver<SessionState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_connect_lifecycle() {
        let cell = SessionStateCell::new();
        assert_eq!(cell.current(), SessionState::Idle);
        cell.transition(SessionState::Connecting).unwrap();
        cell.transition(SessionState::Open).unwrap();
        cell.transition(SessionState::Closed).unwrap();
        cell.transition(SessionState::Connecting).unwrap();
        assert_eq!(cell.current(), SessionState::Connecting);
    }

    #[test]
    fn reconnect_cycle_and_exhaustion() {
        let cell = SessionStateCell::new();
        cell.transition(SessionState::Connecting).unwrap();
        cell.transition(SessionState::Open).unwrap();
        cell.transition(SessionState::Reconnecting).unwrap();
        cell.transition(SessionState::Connecting).unwrap();
        cell.transition(SessionState::Reconnecting).unwrap();
        cell.transition(SessionState::Failed).unwrap();
        // Manual retry is allowed out of Failed.
        cell.transition(SessionState::Connecting).unwrap();
    }

    #[test]
    fn rejects_impossible_hops() {
        let cell = SessionStateCell::new();
        assert!(cell.transition(SessionState::Open).is_err());
        cell.transition(SessionState::Connecting).unwrap();
        cell.transition(SessionState::Open).unwrap();
        let err = cell.transition(SessionState::Connecting).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
        // Failed transition left the state untouched.
        assert_eq!(cell.current(), SessionState::Open);
    }

    #[test]
    fn subscribers_observe_transitions() {
        let cell = SessionStateCell::new();
        let rx = cell.subscribe();
        cell.transition(SessionState::Connecting).unwrap();
        cell.transition(SessionState::Open).unwrap();
        assert_eq!(rx.try_recv().unwrap(), SessionState::Connecting);
        assert_eq!(rx.try_recv().unwrap(), SessionState::Open);
    }
}
