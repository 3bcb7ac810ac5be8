use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::vr::{VrError, VrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Unknown = 0,
    Idle = 1,
    Ready = 2,
    Synchronized = 3,
    Visible = 4,
    Focused = 5,
    Stopping = 6,
    LossPending = 7,
    Exiting = 8,
}

impl SessionState {
    pub const fn all() -> [SessionState; 9] {
        [
            SessionState::Unknown,
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
            SessionState::Stopping,
            SessionState::LossPending,
            SessionState::Exiting,
        ]
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Synchronized
                | SessionState::Visible
                | SessionState::Focused
        )
    }

    pub fn should_close(self) -> bool {
        matches!(self, SessionState::Exiting | SessionState::LossPending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Idle => "idle",
            SessionState::Ready => "ready",
            SessionState::Synchronized => "synchronized",
            SessionState::Visible => "visible",
            SessionState::Focused => "focused",
            SessionState::Stopping => "stopping",
            SessionState::LossPending => "loss-pending",
            SessionState::Exiting => "exiting",
        }
    }

    fn from_u8(value: u8) -> SessionState {
        SessionState::all()
            .get(value as usize)
            .copied()
            .unwrap_or(SessionState::Unknown)
    }
}

/// Tracks the session state delivered by the runtime.
///
/// The reader/writer lock orders state transitions against frame
/// operations: a transition (and its side effects) runs under the write
/// lock, and every "check state, then call the runtime" sequence runs under
/// the read lock for the whole check-and-call. The atomic snapshot mirrors
/// the locked value for non-blocking queries.
pub struct SessionStateMachine {
    state: RwLock<SessionState>,
    snapshot: AtomicU8,
    // Only written under the write lock.
    shut_down: AtomicBool,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Unknown),
            snapshot: AtomicU8::new(SessionState::Unknown as u8),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Lock-free view of the current state. Not ordered against transitions.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.snapshot.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        !self.is_shut_down() && self.state().is_running()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn should_close(&self) -> bool {
        self.state().should_close()
    }

    pub fn transition<R>(
        &self,
        new_state: SessionState,
        side_effects: impl FnOnce(SessionState, SessionState) -> R,
    ) -> (SessionState, R) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old = *guard;
        *guard = new_state;
        self.snapshot.store(new_state as u8, Ordering::Release);
        let result = side_effects(old, new_state);
        (old, result)
    }

    pub fn with_state<R>(&self, f: impl FnOnce(SessionState) -> VrResult<R>) -> VrResult<R> {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_shut_down() {
            return Err(VrError::SessionDestroyed);
        }
        f(*guard)
    }

    /// Runs `f` only while the session is running, holding shared access for
    /// the duration of `f` so no transition can land between check and call.
    pub fn gated<R>(&self, f: impl FnOnce(SessionState) -> VrResult<R>) -> VrResult<R> {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let state = *guard;
        if self.is_shut_down() {
            return Err(VrError::SessionDestroyed);
        }
        if !state.is_running() {
            return Err(VrError::NotRunning(state));
        }
        f(state)
    }

    /// Waits for in-flight gated calls to finish, then refuses all later ones.
    pub fn shut_down(&self) {
        let _guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.shut_down.store(true, Ordering::Release);
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn running_and_close_sets_partition_states() {
        for state in SessionState::all() {
            let running = matches!(
                state,
                SessionState::Ready
                    | SessionState::Synchronized
                    | SessionState::Visible
                    | SessionState::Focused
            );
            assert_eq!(state.is_running(), running, "{state:?}");
            let closing = matches!(state, SessionState::Exiting | SessionState::LossPending);
            assert_eq!(state.should_close(), closing, "{state:?}");
        }
    }

    #[test]
    fn tracked_state_is_last_delivered() {
        let machine = SessionStateMachine::new();
        assert_eq!(machine.state(), SessionState::Unknown);

        for state in [
            SessionState::Idle,
            SessionState::Ready,
            SessionState::Focused,
            SessionState::Stopping,
        ] {
            let (_, ()) = machine.transition(state, |_, _| ());
            assert_eq!(machine.state(), state);
        }
    }

    #[test]
    fn transition_reports_previous_state() {
        let machine = SessionStateMachine::new();
        machine.transition(SessionState::Ready, |_, _| ());
        let (old, seen) = machine.transition(SessionState::Focused, |old, new| (old, new));
        assert_eq!(old, SessionState::Ready);
        assert_eq!(seen, (SessionState::Ready, SessionState::Focused));
    }

    #[test]
    fn gated_rejects_when_not_running() {
        let machine = SessionStateMachine::new();
        let result = machine.gated(|_| Ok(()));
        assert!(matches!(
            result,
            Err(VrError::NotRunning(SessionState::Unknown))
        ));

        machine.transition(SessionState::Visible, |_, _| ());
        assert!(machine.gated(|state| Ok(state)).is_ok());
    }

    #[test]
    fn transition_waits_for_gated_call_to_finish() {
        let machine = Arc::new(SessionStateMachine::new());
        machine.transition(SessionState::Focused, |_, _| ());

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let frame_machine = Arc::clone(&machine);
        let frame = thread::spawn(move || {
            frame_machine
                .gated(|state| {
                    entered_tx.send(()).expect("signal entry");
                    thread::sleep(Duration::from_millis(50));
                    Ok((state, frame_machine.state()))
                })
                .expect("session running")
        });

        entered_rx.recv().expect("frame thread entered");
        machine.transition(SessionState::Stopping, |_, _| ());
        let (checked, observed_at_end) = frame.join().expect("frame thread");

        assert_eq!(checked, SessionState::Focused);
        assert_eq!(observed_at_end, SessionState::Focused);
        assert_eq!(machine.state(), SessionState::Stopping);
    }

    #[test]
    fn shut_down_refuses_later_calls() {
        let machine = SessionStateMachine::new();
        machine.transition(SessionState::Focused, |_, _| ());
        machine.shut_down();

        assert!(!machine.is_running());
        assert_eq!(machine.state(), SessionState::Focused);
        assert!(matches!(machine.gated(|_| Ok(())), Err(VrError::SessionDestroyed)));
        assert!(matches!(
            machine.with_state(|_| Ok(())),
            Err(VrError::SessionDestroyed)
        ));
    }
}
