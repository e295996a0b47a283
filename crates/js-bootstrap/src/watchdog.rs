use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

use futures::task::AtomicWaker;

use crate::types::{BridgeArg, SandboxError, ScriptId};

/// One-shot cancellation signal shared with the interpreter thread.
#[derive(Debug, Default)]
pub(crate) struct Interrupt {
    fired: AtomicBool,
    waker: AtomicWaker,
}

impl Interrupt {
    pub(crate) fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub(crate) fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub(crate) fn register(&self, waker: &Waker) {
        self.waker.register(waker);
    }
}

/// What the interpreter thread reports back, in program order.
#[derive(Debug)]
pub(crate) enum Event {
    Started(ScriptId),
    Call { bridge: usize, args: Vec<BridgeArg> },
    /// Number of page scripts executed, or the error that ended the run.
    Finished(Result<usize, SandboxError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stalled {
    /// The running script used up its budget. The interrupt has fired.
    Expired(ScriptId),
    /// The interpreter thread went away without finishing.
    Lost(Option<ScriptId>),
}

/// Host-side deadline over the interpreter's event stream.
///
/// Each [`Event::Started`] arms a fresh budget for that script. Nothing
/// the script does afterwards extends it, bridge calls included.
pub(crate) struct Watchdog {
    events: Receiver<Event>,
    budget: Duration,
    interrupt: Arc<Interrupt>,
    current: Option<(ScriptId, Instant)>,
}

impl Watchdog {
    pub(crate) fn new(events: Receiver<Event>, budget: Duration, interrupt: Arc<Interrupt>) -> Self {
        Self {
            events,
            budget,
            interrupt,
            current: None,
        }
    }

    pub(crate) fn next(&mut self) -> Result<Event, Stalled> {
        let received = match self.current {
            // Context setup is not charged to any script.
            None => self
                .events
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
            Some((script, deadline)) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(self.expire(script));
                }
                self.events.recv_timeout(remaining)
            }
        };
        match received {
            Ok(Event::Started(script)) => {
                self.current = Some((script, Instant::now() + self.budget));
                Ok(Event::Started(script))
            }
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => match self.current {
                Some((script, _)) => Err(self.expire(script)),
                None => Err(Stalled::Lost(None)),
            },
            Err(RecvTimeoutError::Disconnected) => {
                Err(Stalled::Lost(self.current.map(|(script, _)| script)))
            }
        }
    }

    fn expire(&self, script: ScriptId) -> Stalled {
        self.interrupt.fire();
        Stalled::Expired(script)
    }
}
