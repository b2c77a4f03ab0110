//! # Dispatch hooks
//!
//! Lets a built-in decide, without knowing the transport, whether a "do this
//! elsewhere" action is forwarded to a remote peer or run in-process.
//!
//! The distributed-mode bootstrap registers one [`DispatchHooks`] record on the
//! runtime's [`Dispatcher`] and unregisters it on shutdown. Built-ins only ever see
//! the dispatcher: no hooks, a negative `should_use_remote`, a failed send or a send that misses
//! its deadline all mean "run it locally".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/* ===================== Request Types ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchAction {
    Shell,
    Workflow,
    Eval,
    Push,
    Pull,
}

impl fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchAction::Shell => "shell",
            DispatchAction::Workflow => "workflow",
            DispatchAction::Eval => "eval",
            DispatchAction::Push => "push",
            DispatchAction::Pull => "pull",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Master,
    Worker,
}

impl PeerRole {
    /// `"master"` (any case) selects the master; anything else a worker
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("master") {
            PeerRole::Master
        } else {
            PeerRole::Worker
        }
    }
}

/// What the built-in wants done remotely
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub expression: String,
    pub workflow: String,
    pub target: String,
    pub params: HashMap<String, String>,
}

/// A request as handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub id: Uuid,
    pub action: DispatchAction,
    pub expression: String,
    pub workflow: String,
    pub target: String,
    pub params: HashMap<String, String>,
    pub target_role: PeerRole,
    pub target_scope: String,
    pub issued_at: DateTime<Utc>,
    /// Time the transport has to accept the request
    pub deadline_ms: u64,
}

/// Connection parameters for a named remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConnection {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub work_dir: String,
}

/* ===================== Hooks ===================== */

pub type SendFn = Arc<dyn Fn(&DispatchRequest) -> anyhow::Result<()> + Send + Sync>;
pub type ShouldUseRemoteFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type ResolvePeerFn = Arc<dyn Fn(&str) -> Option<PeerConnection> + Send + Sync>;
pub type TeardownFn = Arc<dyn Fn() + Send + Sync>;

/// Callback record supplied by the distributed transport
#[derive(Clone)]
pub struct DispatchHooks {
    send: SendFn,
    should_use_remote: ShouldUseRemoteFn,
    resolve_peer: Option<ResolvePeerFn>,
    teardown: Option<TeardownFn>,
}

impl DispatchHooks {
    /// Hooks that always prefer remote execution and resolve no peers
    pub fn new<F>(send: F) -> Self
    where
        F: Fn(&DispatchRequest) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            send: Arc::new(send),
            should_use_remote: Arc::new(|| true),
            resolve_peer: None,
            teardown: None,
        }
    }

    pub fn with_should_use_remote<F>(mut self, select: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.should_use_remote = Arc::new(select);
        self
    }

    pub fn with_peer_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&str) -> Option<PeerConnection> + Send + Sync + 'static,
    {
        self.resolve_peer = Some(Arc::new(resolve));
        self
    }

    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(teardown));
        self
    }
}

impl fmt::Debug for DispatchHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHooks")
            .field("resolve_peer", &self.resolve_peer.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/* ===================== Dispatcher ===================== */

/// Sends allowed to be running at once, including ones past their deadline
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Guards the single, optional hooks record
///
/// The record is replaced wholesale and never mutated in place, so consulting it
/// only needs a read lock long enough to clone the `Arc`.
#[derive(Debug)]
pub struct Dispatcher {
    hooks: RwLock<Option<Arc<DispatchHooks>>>,
    send_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl Dispatcher {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(None),
            send_timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Cap the send threads alive at once; a send over the cap runs locally
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Send threads still running, timed-out ones included
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn reserve_send(&self) -> Option<InFlightSlot> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            })
            .ok()
            .map(|_| InFlightSlot(self.in_flight.clone()))
    }

    /// Install hooks, tearing down any record they replace
    pub fn register(&self, hooks: DispatchHooks) {
        let previous = self
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(hooks));

        if let Some(previous) = previous {
            run_teardown(&previous);
        }
        info!("Dispatch hooks registered");
    }

    /// Remove the hooks and run their teardown; a no-op when none are registered
    pub fn unregister(&self) -> bool {
        let previous = self
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match previous {
            Some(previous) => {
                run_teardown(&previous);
                info!("Dispatch hooks unregistered");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<DispatchHooks>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Try to hand an action to a remote peer
    ///
    /// Returns `true` only when the transport accepted the request within the send
    /// timeout; the remote result is never awaited. Every failure is logged and
    /// reported as `false` so the caller runs the action locally. A send that
    /// completes after the deadline may still be delivered.
    pub fn try_send(
        &self,
        action: DispatchAction,
        payload: DispatchPayload,
        target_role: PeerRole,
        target_scope: &str,
    ) -> bool {
        let Some(hooks) = self.current() else {
            debug!(%action, "No dispatch hooks registered, running locally");
            return false;
        };

        if !(hooks.should_use_remote)() {
            debug!(%action, "Remote execution not selected, running locally");
            return false;
        }

        let request = DispatchRequest {
            id: Uuid::new_v4(),
            action,
            expression: payload.expression,
            workflow: payload.workflow,
            target: payload.target,
            params: payload.params,
            target_role,
            target_scope: target_scope.to_string(),
            issued_at: Utc::now(),
            deadline_ms: self.send_timeout.as_millis() as u64,
        };
        let request_id = request.id;

        let Some(slot) = self.reserve_send() else {
            warn!(
                %action,
                request_id = %request_id,
                max_in_flight = self.max_in_flight,
                "Too many dispatch sends in flight, running locally"
            );
            return false;
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let send = hooks.send.clone();
        let spawned = std::thread::Builder::new()
            .name("cadence-dispatch".to_string())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(send(&request));
            });

        if let Err(e) = spawned {
            warn!(%action, request_id = %request_id, error = %e, "Failed to start dispatch send");
            return false;
        }

        match rx.recv_timeout(self.send_timeout) {
            Ok(Ok(())) => {
                debug!(%action, request_id = %request_id, role = ?target_role, "Dispatched remotely");
                true
            }
            Ok(Err(e)) => {
                warn!(%action, request_id = %request_id, error = %e, "Remote dispatch failed, running locally");
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    %action,
                    request_id = %request_id,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Remote dispatch timed out, running locally"
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(%action, request_id = %request_id, "Dispatch send panicked, running locally");
                false
            }
        }
    }

    /// Translate a peer alias, id or address into connection parameters
    pub fn resolve_peer(&self, identifier: &str) -> Option<PeerConnection> {
        let hooks = self.current()?;
        let resolve = hooks.resolve_peer.as_ref()?;
        resolve(identifier)
    }
}

/// One reserved send; releases the reservation when the send thread ends, even by panic
struct InFlightSlot(Arc<AtomicUsize>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_teardown(hooks: &DispatchHooks) {
    if let Some(teardown) = &hooks.teardown {
        teardown();
    }
}
