//! Interactive inclusion coordination.
//!
//! Inclusion may pause twice to ask a human something: which security
//! classes to grant, and the PIN printed on the device. The driver asks
//! through [`InclusionUserCallbacks`]; the answer arrives later as a
//! separate command, possibly from a different client. The coordinator
//! pairs the two with a [`Deferred`] per question.
//!
//! ```text
//!   driver ──grant_security_classes()──▶ channel: Idle ─▶ Pending{gen, resolver}
//!                                           │  event "grant security classes"
//!                                           ▼  to the initiating session
//!   any client ── controller.grant_security_classes ──▶ resolver.resolve(grant)
//!                                           │
//!   driver ◀──────── Some(grant) ───────────┘   channel back to Idle
//! ```
//!
//! There is one coordinator per server. Each channel holds at most one
//! pending exchange; starting a new interactive operation while either is
//! pending is refused, never queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use zws_core::{ControllerEvent, EventSource, InclusionGrant, InclusionUserCallbacks};

use crate::deferred::{deferred, Deferred, Resolver};
use crate::error::{CommandError, InclusionPhase};
use crate::session::ClientSession;

// ============================================================================
// Channels
// ============================================================================

enum Exchange<T> {
    Idle,
    Pending { generation: u64, resolver: Resolver<T> },
}

/// One single-slot question channel.
struct Channel<T> {
    phase: InclusionPhase,
    slot: Mutex<Exchange<T>>,
}

impl<T> Channel<T> {
    fn new(phase: InclusionPhase) -> Self {
        Self {
            phase,
            slot: Mutex::new(Exchange::Idle),
        }
    }

    fn is_pending(&self) -> bool {
        matches!(*self.slot.lock(), Exchange::Pending { .. })
    }

    /// Moves to `Pending`. A stale exchange still in the slot is rejected.
    fn open(&self, generation: u64) -> Deferred<T> {
        let (resolver, waiter) = deferred();
        let previous = std::mem::replace(
            &mut *self.slot.lock(),
            Exchange::Pending {
                generation,
                resolver,
            },
        );
        if let Exchange::Pending { resolver, .. } = previous {
            resolver.reject();
        }
        waiter
    }

    /// Answers the pending exchange, leaving the channel `Idle`.
    fn resolve(&self, value: T) -> Result<(), CommandError> {
        match std::mem::replace(&mut *self.slot.lock(), Exchange::Idle) {
            Exchange::Pending { resolver, .. } => {
                resolver.resolve(value);
                Ok(())
            }
            Exchange::Idle => Err(CommandError::InclusionPhaseNotInProgress(self.phase)),
        }
    }

    /// Returns to `Idle` if the slot still belongs to `generation`.
    fn close(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Exchange::Pending { generation: g, .. } if g == generation) {
            *slot = Exchange::Idle;
        }
    }

    /// Opens an exchange whose slot is released when the guard drops.
    fn ask(&self, generation: u64) -> (ExchangeGuard<'_, T>, Deferred<T>) {
        let waiter = self.open(generation);
        (
            ExchangeGuard {
                channel: self,
                generation,
            },
            waiter,
        )
    }

    /// Rejects whatever is pending. Returns whether anything was.
    fn reject(&self) -> bool {
        match std::mem::replace(&mut *self.slot.lock(), Exchange::Idle) {
            Exchange::Pending { resolver, .. } => {
                resolver.reject();
                true
            }
            Exchange::Idle => false,
        }
    }
}

/// Releases a channel slot however the waiting future ends.
struct ExchangeGuard<'a, T> {
    channel: &'a Channel<T>,
    generation: u64,
}

impl<T> Drop for ExchangeGuard<'_, T> {
    fn drop(&mut self) {
        self.channel.close(self.generation);
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Owns both interactive channels for the whole server.
pub struct InclusionCoordinator {
    grant: Channel<InclusionGrant>,
    pin: Channel<String>,
    next_generation: AtomicU64,
}

impl Default for InclusionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InclusionCoordinator {
    pub fn new() -> Self {
        Self {
            grant: Channel::new(InclusionPhase::GrantSecurityClasses),
            pin: Channel::new(InclusionPhase::ValidateDskAndEnterPin),
            next_generation: AtomicU64::new(1),
        }
    }

    /// True while either question is waiting for an answer.
    pub fn is_busy(&self) -> bool {
        self.grant.is_pending() || self.pin.is_pending()
    }

    /// Refuses to start an interactive operation while one is waiting.
    pub fn ensure_idle(&self) -> Result<(), CommandError> {
        if self.is_busy() {
            return Err(CommandError::InclusionAlreadyInProgress);
        }
        Ok(())
    }

    pub fn is_pending(&self, phase: InclusionPhase) -> bool {
        match phase {
            InclusionPhase::GrantSecurityClasses => self.grant.is_pending(),
            InclusionPhase::ValidateDskAndEnterPin => self.pin.is_pending(),
        }
    }

    /// Answers a pending security class question.
    pub fn grant_security_classes(&self, grant: InclusionGrant) -> Result<(), CommandError> {
        self.grant.resolve(grant)?;
        debug!("Security classes granted");
        Ok(())
    }

    /// Answers a pending PIN question.
    pub fn validate_dsk_and_enter_pin(&self, pin: String) -> Result<(), CommandError> {
        self.pin.resolve(pin)?;
        debug!("DSK PIN entered");
        Ok(())
    }

    /// Rejects every pending question. Returns whether any was pending.
    pub fn abort(&self) -> bool {
        let grant = self.grant.reject();
        let pin = self.pin.reject();
        grant || pin
    }

    /// Builds the callbacks handed to the driver for one operation.
    pub fn callbacks_for(
        self: &Arc<Self>,
        session: Arc<ClientSession>,
    ) -> Arc<dyn InclusionUserCallbacks> {
        Arc::new(SessionCallbacks {
            coordinator: Arc::clone(self),
            session,
            unanswered: AtomicBool::new(false),
        })
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }
}

// ============================================================================
// Driver callbacks
// ============================================================================

/// Callbacks bound to the session that started the operation.
struct SessionCallbacks {
    coordinator: Arc<InclusionCoordinator>,
    session: Arc<ClientSession>,
    /// Set while a question is open and until it is answered. A driver that
    /// gives up by dropping the question leaves it set, so a later `abort`
    /// still reports the abandoned exchange.
    unanswered: AtomicBool,
}

impl SessionCallbacks {
    async fn ask<T>(&self, waiter: Deferred<T>) -> Option<T> {
        self.unanswered.store(true, Ordering::Release);
        let answer = waiter.wait().await.ok();
        if answer.is_some() {
            self.unanswered.store(false, Ordering::Release);
        }
        answer
    }
}

#[async_trait]
impl InclusionUserCallbacks for SessionCallbacks {
    async fn grant_security_classes(&self, requested: InclusionGrant) -> Option<InclusionGrant> {
        let generation = self.coordinator.generation();
        let (_guard, waiter) = self.coordinator.grant.ask(generation);
        self.session.send_controller_event(
            &ControllerEvent::new(EventSource::Controller, "grant security classes")
                .with("requested", &requested),
        );
        self.ask(waiter).await
    }

    async fn validate_dsk_and_enter_pin(&self, dsk: String) -> Option<String> {
        let generation = self.coordinator.generation();
        let (_guard, waiter) = self.coordinator.pin.ask(generation);
        self.session.send_controller_event(
            &ControllerEvent::new(EventSource::Controller, "validate dsk and enter pin")
                .with("dsk", &dsk),
        );
        self.ask(waiter).await
    }

    fn abort(&self) {
        let rejected = self.coordinator.abort();
        let abandoned = self.unanswered.swap(false, Ordering::AcqRel);
        if rejected || abandoned {
            info!(client_id = %self.session.id(), "Inclusion aborted");
            self.session.send_controller_event(&ControllerEvent::new(
                EventSource::Controller,
                "inclusion aborted",
            ));
        }
    }
}
