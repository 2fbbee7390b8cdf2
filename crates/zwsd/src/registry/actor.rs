//! Registry actor: owns the session set and the shared fan-out services.
//!
//! The actor is the only code that mutates the session set. After every
//! change it publishes a fresh snapshot on a watch channel, which is all the
//! forwarders ever see.
//!
//! Timers run as separate tasks that hold only a weak sender back to the
//! actor, so they never keep it alive on their own.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response channel send failures are ignored; the caller went away

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use zws_core::Driver;

use super::commands::{RegistryCommand, RegistryError, RegistryStats};
use crate::forward::{spawn_event_forwarder, LogForwarder, SessionSet};
use crate::session::{ClientId, ClientSession};

/// How long a disconnect waits before the sweep that removes it.
///
/// Disconnects arriving within this window share one sweep.
pub const SWEEP_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor.
///
/// Processes commands sequentially in a single task. Owns:
/// - `sessions`: every registered session, keyed by client id
/// - the liveness timer and event forwarder, started with the first session
///   after a teardown and kept until the next teardown
/// - the log forwarder, present only while some session wants logs
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    self_sender: mpsc::WeakSender<RegistryCommand>,
    driver: Arc<dyn Driver>,
    ping_interval: Duration,

    sessions: BTreeMap<ClientId, Arc<ClientSession>>,
    published: watch::Sender<SessionSet>,

    liveness: Option<JoinHandle<()>>,
    events: Option<JoinHandle<()>>,
    logs: Option<LogForwarder>,
    sweep_scheduled: bool,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        self_sender: mpsc::WeakSender<RegistryCommand>,
        driver: Arc<dyn Driver>,
        ping_interval: Duration,
    ) -> Self {
        let (published, _) = watch::channel(SessionSet::default());
        Self {
            receiver,
            self_sender,
            driver,
            ping_interval,
            sessions: BTreeMap::new(),
            published,
            liveness: None,
            events: None,
            logs: None,
            sweep_scheduled: false,
        }
    }

    /// Runs until every `RegistryHandle` is dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        self.stop_services().await;
        info!(sessions = self.sessions.len(), "Registry actor stopped");
    }

    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::AddSession {
                session,
                respond_to,
            } => {
                let result = self.handle_add_session(session);
                let _ = respond_to.send(result);
            }
            RegistryCommand::SessionClosed { client_id } => {
                if self.sessions.contains_key(&client_id) {
                    debug!(client_id = %client_id, "Session closed, sweep scheduled");
                    self.schedule_sweep();
                }
            }
            RegistryCommand::Sweep => {
                self.handle_sweep().await;
            }
            RegistryCommand::CheckAlive => {
                self.handle_check_alive();
            }
            RegistryCommand::Sessions { respond_to } => {
                let _ = respond_to.send(self.sessions.values().cloned().collect());
            }
            RegistryCommand::ReconcileLogs { respond_to } => {
                self.reconcile_logs().await;
                let _ = respond_to.send(());
            }
            RegistryCommand::Teardown { respond_to } => {
                self.handle_teardown().await;
                let _ = respond_to.send(());
            }
            RegistryCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    // ========================================================================
    // Command handlers
    // ========================================================================

    fn handle_add_session(&mut self, session: Arc<ClientSession>) -> Result<(), RegistryError> {
        let client_id = session.id();
        if self.sessions.contains_key(&client_id) {
            return Err(RegistryError::AlreadyRegistered(client_id));
        }

        self.sessions.insert(client_id, session);
        self.publish();
        info!(
            client_id = %client_id,
            total_sessions = self.sessions.len(),
            "Session registered"
        );

        if self.liveness.is_none() {
            self.liveness = Some(spawn_liveness_timer(
                self.self_sender.clone(),
                self.ping_interval,
            ));
        }
        if self.events.is_none() {
            self.events = Some(spawn_event_forwarder(
                self.driver.as_ref(),
                self.published.subscribe(),
            ));
            debug!("Event forwarder started");
        }
        Ok(())
    }

    async fn handle_sweep(&mut self) {
        self.sweep_scheduled = false;

        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.is_connected());
        let removed = before - self.sessions.len();
        if removed > 0 {
            self.publish();
            info!(
                removed,
                remaining = self.sessions.len(),
                "Swept disconnected sessions"
            );
        }

        self.reconcile_logs().await;
    }

    fn handle_check_alive(&mut self) {
        let mut lost = false;
        for session in self.sessions.values() {
            session.check_alive();
            lost |= !session.is_connected();
        }
        if lost {
            self.schedule_sweep();
        }
    }

    async fn handle_teardown(&mut self) {
        if self.sessions.is_empty()
            && self.liveness.is_none()
            && self.events.is_none()
            && self.logs.is_none()
        {
            return;
        }

        info!(sessions = self.sessions.len(), "Tearing down registry");
        for session in self.sessions.values() {
            session.disconnect();
        }
        self.sessions.clear();
        self.publish();
        self.stop_services().await;
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.sessions.len(),
            log_level: self.logs.as_ref().map(LogForwarder::level),
            liveness_running: self.liveness.is_some(),
            events_running: self.events.is_some(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn publish(&self) {
        let snapshot: Vec<_> = self.sessions.values().cloned().collect();
        self.published.send_replace(Arc::new(snapshot));
    }

    fn schedule_sweep(&mut self) {
        if self.sweep_scheduled {
            return;
        }
        self.sweep_scheduled = true;

        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            sleep(SWEEP_DELAY).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(RegistryCommand::Sweep).await;
            }
        });
    }

    /// Starts, restarts or stops the log forwarder.
    ///
    /// Wanted iff a connected session has `receive_logs`; restarted when the
    /// driver's log level no longer matches the attached sink.
    async fn reconcile_logs(&mut self) {
        let wanted = self
            .sessions
            .values()
            .any(|session| session.is_connected() && session.receives_logs());
        let level = self.driver.log_config().level;

        match self.logs.take() {
            Some(forwarder) if wanted && forwarder.level() == level => {
                self.logs = Some(forwarder);
            }
            Some(forwarder) => {
                forwarder.stop().await;
                if wanted {
                    self.start_log_forwarder();
                }
            }
            None if wanted => self.start_log_forwarder(),
            None => {}
        }
    }

    fn start_log_forwarder(&mut self) {
        self.logs = Some(LogForwarder::start(
            self.driver.as_ref(),
            self.published.subscribe(),
        ));
    }

    async fn stop_services(&mut self) {
        if let Some(task) = self.liveness.take() {
            task.abort();
        }
        if let Some(task) = self.events.take() {
            task.abort();
            debug!("Event forwarder stopped");
        }
        if let Some(forwarder) = self.logs.take() {
            forwarder.stop().await;
        }
    }
}

/// Sends `CheckAlive` every `period`, starting one period from now.
fn spawn_liveness_timer(
    sender: mpsc::WeakSender<RegistryCommand>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(sender) = sender.upgrade() else {
                break;
            };
            if sender.send(RegistryCommand::CheckAlive).await.is_err() {
                warn!("Liveness timer stopping: registry channel closed");
                break;
            }
        }
    })
}
