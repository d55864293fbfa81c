//! Half-duplex turn-taking.
//!
//! [`TurnController`] is the only writer of the [`TurnState`]; it is owned by
//! the inbound event router. The capture loop holds a shared [`TurnGate`] and
//! only observes it, suspending on the gate's condition variable while the
//! remote party has the floor.
//!
//! ```text
//!            mark_ready              speech_started
//!   Idle ─────────────────▶ Listening ─────────────▶ Blocked
//!    ▲                          ▲                       │
//!    │ reset                    └───────────────────────┘
//!    │ (failure / stop)          speech_stopped | response_done
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Who currently holds the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Session not ready yet, or torn down
    #[default]
    Idle,
    /// Microphone frames may be forwarded
    Listening,
    /// Remote party is speaking or a reply is being generated
    Blocked,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Idle => write!(f, "idle"),
            TurnState::Listening => write!(f, "listening"),
            TurnState::Blocked => write!(f, "blocked"),
        }
    }
}

/// Outcome of waiting on the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    /// The gate is open; the next frame may be forwarded
    Listening,
    /// The session is stopping; the waiter must exit
    Stopped,
}

#[derive(Debug, Default)]
struct GateInner {
    state: TurnState,
    stopped: bool,
    /// Entries into `Blocked` so far
    blocks: u64,
}

/// Shared view of the turn state with a blocking wait.
#[derive(Debug, Default)]
pub struct TurnGate {
    inner: Mutex<GateInner>,
    changed: Condvar,
}

impl TurnGate {
    /// Current turn state.
    pub fn state(&self) -> TurnState {
        self.inner.lock().state
    }

    /// Whether a frame read right now may be forwarded.
    pub fn is_listening(&self) -> bool {
        let inner = self.inner.lock();
        !inner.stopped && inner.state == TurnState::Listening
    }

    /// How many times the remote party has taken the floor.
    ///
    /// A reader that sees this change knows a blocked interval happened,
    /// even if the state is back to `Listening` by the time it looks.
    pub fn blocks(&self) -> u64 {
        self.inner.lock().blocks
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Block until the gate opens or the session stops.
    pub fn wait_listening(&self) -> GateWait {
        let mut inner = self.inner.lock();
        loop {
            if inner.stopped {
                return GateWait::Stopped;
            }
            if inner.state == TurnState::Listening {
                return GateWait::Listening;
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Wake every waiter and make all future waits return
    /// [`GateWait::Stopped`]. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.stopped {
            inner.stopped = true;
            debug!("turn gate stopped");
        }
        drop(inner);
        self.changed.notify_all();
    }
}

/// Single writer of the turn state machine.
///
/// Not `Clone`: the router that owns it is the only flow allowed
/// to move the state.
#[derive(Debug)]
pub struct TurnController {
    gate: Arc<TurnGate>,
}

impl Default for TurnController {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnController {
    /// Create a controller in [`TurnState::Idle`].
    pub fn new() -> Self {
        Self {
            gate: Arc::new(TurnGate::default()),
        }
    }

    /// Reader handle for the capture loop.
    pub fn gate(&self) -> Arc<TurnGate> {
        Arc::clone(&self.gate)
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        self.gate.state()
    }

    /// Session is ready: `Idle → Listening`. No effect in any other state.
    pub fn mark_ready(&self) -> bool {
        self.transition("session ready", |state| match state {
            TurnState::Idle => Some(TurnState::Listening),
            _ => None,
        })
    }

    /// Remote speech began: any state `→ Blocked`.
    pub fn speech_started(&self) -> bool {
        self.transition("speech started", |state| match state {
            TurnState::Blocked => None,
            _ => Some(TurnState::Blocked),
        })
    }

    /// Remote speech ended: `Blocked → Listening`.
    pub fn speech_stopped(&self) -> bool {
        self.rearm("speech stopped")
    }

    /// Response finished: `Blocked → Listening`.
    pub fn response_done(&self) -> bool {
        self.rearm("response done")
    }

    /// Transport failure or explicit stop: any state `→ Idle`.
    pub fn reset(&self) -> bool {
        self.transition("reset", |state| match state {
            TurnState::Idle => None,
            _ => Some(TurnState::Idle),
        })
    }

    fn rearm(&self, cause: &'static str) -> bool {
        self.transition(cause, |state| match state {
            TurnState::Blocked => Some(TurnState::Listening),
            _ => None,
        })
    }

    /// Apply `next` under the gate lock. Returns whether the state changed.
    fn transition(
        &self,
        cause: &'static str,
        next: impl FnOnce(TurnState) -> Option<TurnState>,
    ) -> bool {
        let mut inner = self.gate.inner.lock();
        let from = inner.state;
        let Some(to) = next(from) else {
            return false;
        };
        inner.state = to;
        if to == TurnState::Blocked {
            inner.blocks += 1;
        }
        drop(inner);

        debug!(%from, %to, cause, "turn state changed");
        self.gate.changed.notify_all();
        true
    }
}
