// src/services/agent_status.rs
use crate::backend::AgentBackend;
use crate::error::SoftphoneError;
use crate::models::{AgentStatus, VoiceSettings};
use crate::services::acw_countdown::AcwCountdown;
use crate::services::call_state::CallStateClient;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What the dashboard shows about the agent
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentSnapshot {
    pub status: AgentStatus,
    pub acw_remaining_seconds: Option<u32>,
    pub connection_failure_message: Option<String>,
    pub is_connecting: bool,
}

struct AgentState {
    status: AgentStatus,
    /// Status the agent had when the current call started
    pre_call_status: Option<AgentStatus>,
    acw_remaining: Option<u32>,
    /// Bumped on every ACW start or cancel; a completion only counts if it
    /// still matches
    acw_generation: u64,
    connection_failure: Option<String>,
    is_connecting: bool,
    settings: Option<VoiceSettings>,
}

impl AgentState {
    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            status: self.status,
            acw_remaining_seconds: self.acw_remaining,
            connection_failure_message: self.connection_failure.clone(),
            is_connecting: self.is_connecting,
        }
    }
}

/// Keeps the agent's server-side status consistent with the softphone.
///
/// Manual changes go through `handle_status_change`. Call start/end is
/// observed from the call state client: `busy` while a call is active,
/// then After-Call-Work (or straight back to `available`) once it ends.
/// Every server update is serialized through `gate`.
pub struct AgentStatusCoordinator {
    calls: Arc<CallStateClient>,
    backend: Arc<dyn AgentBackend>,
    state: Mutex<AgentState>,
    snapshot_tx: watch::Sender<AgentSnapshot>,
    gate: AsyncMutex<()>,
    acw: AcwCountdown,
    default_acw_secs: u32,
    watcher: Mutex<Option<JoinHandle<()>>>,
    this: Weak<AgentStatusCoordinator>,
}

impl AgentStatusCoordinator {
    pub fn new(
        calls: Arc<CallStateClient>,
        backend: Arc<dyn AgentBackend>,
        default_acw_secs: u32,
    ) -> Arc<Self> {
        let state = AgentState {
            status: AgentStatus::Offline,
            pre_call_status: None,
            acw_remaining: None,
            acw_generation: 0,
            connection_failure: None,
            is_connecting: false,
            settings: None,
        };
        let (snapshot_tx, _) = watch::channel(state.snapshot());

        let coordinator = Arc::new_cyclic(|this| Self {
            calls,
            backend,
            state: Mutex::new(state),
            snapshot_tx,
            gate: AsyncMutex::new(()),
            acw: AcwCountdown::new(),
            default_acw_secs,
            watcher: Mutex::new(None),
            this: this.clone(),
        });
        coordinator.spawn_call_watcher();
        coordinator
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        self.state.lock().snapshot()
    }

    pub fn status(&self) -> AgentStatus {
        self.state.lock().status
    }

    fn update<F: FnOnce(&mut AgentState)>(&self, f: F) {
        let mut state = self.state.lock();
        f(&mut state);
        self.snapshot_tx.send_replace(state.snapshot());
    }

    // ==================== Manual status changes ====================

    /// Change the agent's status on the agent's behalf.
    ///
    /// Going `available` connects the softphone first; if that fails the
    /// change is abandoned and the server is not told. Otherwise the status
    /// is applied locally, sent to the server and reconciled with its reply.
    #[instrument(skip(self))]
    pub async fn handle_status_change(
        &self,
        new_status: AgentStatus,
    ) -> Result<AgentStatus, SoftphoneError> {
        if !new_status.is_manually_selectable() {
            return Err(SoftphoneError::StatusNotSelectable(new_status));
        }
        if self.calls.call_state().is_active() {
            return Err(SoftphoneError::StatusLocked);
        }

        let _gate = self.gate.lock().await;
        self.change_status_locked(new_status).await
    }

    async fn change_status_locked(
        &self,
        new_status: AgentStatus,
    ) -> Result<AgentStatus, SoftphoneError> {
        // A failed connect leaves any running ACW countdown in place
        if new_status == AgentStatus::Available && !self.calls.is_ready() {
            self.connect_softphone().await?;
        }
        self.cancel_acw();

        let previous = self.status();
        self.update(|s| s.status = new_status);
        info!("👤 Agent status: {} → {}", previous, new_status);

        match self.backend.update_agent_status(new_status).await {
            Ok(presence) => {
                if presence.status != new_status {
                    warn!(
                        "Server kept agent on '{}' instead of '{}'",
                        presence.status, new_status
                    );
                }
                self.update(|s| s.status = presence.status);

                if presence.status == AgentStatus::Offline && self.calls.is_ready() {
                    if let Err(e) = self.calls.shutdown().await {
                        warn!("Softphone disconnect failed: {}", e);
                    }
                }
                Ok(presence.status)
            }
            Err(e) => {
                error!("❌ Status update to '{}' failed: {}", new_status, e);
                self.update(|s| s.status = previous);
                Err(e.into())
            }
        }
    }

    async fn connect_softphone(&self) -> Result<(), SoftphoneError> {
        self.update(|s| {
            s.is_connecting = true;
            s.connection_failure = None;
        });

        let result = self.calls.initialize().await;

        match result {
            Ok(()) => {
                self.update(|s| s.is_connecting = false);
                Ok(())
            }
            Err(e) => {
                let message = match e {
                    SoftphoneError::ConnectionFailed(message) => message,
                    other => other.to_string(),
                };
                warn!("Staying {}: softphone did not connect: {}", self.status(), message);
                self.update(|s| {
                    s.is_connecting = false;
                    s.connection_failure = Some(message.clone());
                });
                Err(SoftphoneError::ConnectionFailed(message))
            }
        }
    }

    /// Clear the connection failure banner. Does not retry.
    pub fn dismiss_connection_failure(&self) {
        self.update(|s| s.connection_failure = None);
    }

    // ==================== Server sync ====================

    /// Adopt the server's view of the agent's status.
    ///
    /// Skipped while a local change is in flight, a call is active or ACW
    /// is running, since those states are owned locally.
    pub async fn refresh_status(&self) -> Result<AgentStatus, SoftphoneError> {
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("Status change in flight, skipping refresh");
            return Ok(self.status());
        };

        let presence = self.backend.get_agent_status().await?;

        let mut adopted = false;
        self.update(|s| {
            if s.pre_call_status.is_none() && s.acw_remaining.is_none() && s.status != presence.status {
                s.status = presence.status;
                adopted = true;
            }
        });
        if adopted {
            info!("👤 Agent status from server: {}", presence.status);
        }
        Ok(self.status())
    }

    pub async fn refresh_settings(&self) -> Result<VoiceSettings, SoftphoneError> {
        let settings = self.backend.get_voice_settings().await?;
        self.update(|s| s.settings = Some(settings.clone()));
        Ok(settings)
    }

    /// ACW length: fresh settings, else the last known, else the default
    async fn acw_timeout(&self) -> u32 {
        match self.refresh_settings().await {
            Ok(settings) => settings.acw_timeout_seconds,
            Err(e) => {
                let cached = self
                    .state
                    .lock()
                    .settings
                    .as_ref()
                    .map(|s| s.acw_timeout_seconds);
                let fallback = cached.unwrap_or(self.default_acw_secs);
                warn!("Voice settings unavailable ({}), using ACW of {}s", e, fallback);
                fallback
            }
        }
    }

    /// Poll the server for status changes made elsewhere
    pub fn spawn_status_poller(&self, every: Duration) -> JoinHandle<()> {
        let weak = self.this.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(coordinator) = weak.upgrade() else { return };
                if let Err(e) = coordinator.refresh_status().await {
                    warn!("Agent status poll failed: {}", e);
                }
            }
        })
    }

    // ==================== Call lifecycle ====================

    fn spawn_call_watcher(&self) {
        let weak = self.this.clone();
        let mut rx = self.calls.subscribe();

        let handle = tokio::spawn(async move {
            let mut in_call = rx.borrow_and_update().call_state.is_active();
            while rx.changed().await.is_ok() {
                let active = rx.borrow_and_update().call_state.is_active();
                if active == in_call {
                    continue;
                }
                in_call = active;

                let Some(coordinator) = weak.upgrade() else { return };
                if active {
                    coordinator.on_call_started().await;
                } else {
                    coordinator.on_call_finished().await;
                }
            }
        });

        *self.watcher.lock() = Some(handle);
    }

    async fn on_call_started(&self) {
        let _gate = self.gate.lock().await;
        self.cancel_acw();

        self.update(|s| {
            if s.pre_call_status.is_none() {
                s.pre_call_status = Some(s.status);
            }
            s.status = AgentStatus::Busy;
        });
        info!("📞 Call started, agent busy");
        self.push_system_status(AgentStatus::Busy).await;
    }

    async fn on_call_finished(&self) {
        let _gate = self.gate.lock().await;

        let mut before = AgentStatus::Available;
        self.update(|s| {
            before = s.pre_call_status.take().unwrap_or(s.status);
        });

        if matches!(before, AgentStatus::Unavailable | AgentStatus::Offline) {
            info!("Call finished, restoring '{}'", before);
            self.update(|s| s.status = before);
            self.push_system_status(before).await;
            return;
        }

        let seconds = self.acw_timeout().await;
        if seconds == 0 {
            info!("Call finished, no ACW configured");
            if let Err(e) = self.change_status_locked(AgentStatus::Available).await {
                error!("Return to available after call failed: {}", e);
                self.update(|s| s.status = AgentStatus::AfterCallWork);
                self.push_system_status(AgentStatus::AfterCallWork).await;
            }
            return;
        }

        self.update(|s| s.status = AgentStatus::AfterCallWork);
        self.push_system_status(AgentStatus::AfterCallWork).await;
        self.start_acw(seconds);
    }

    /// Server update for a status the system chose. The local status
    /// stands on failure.
    async fn push_system_status(&self, status: AgentStatus) {
        match self.backend.update_agent_status(status).await {
            Ok(presence) if presence.status != status => {
                warn!("Server answered '{}' for system status '{}'", presence.status, status);
            }
            Ok(_) => {}
            Err(e) => error!("❌ Failed to report status '{}': {}", status, e),
        }
    }

    // ==================== After-Call-Work ====================

    fn start_acw(&self, seconds: u32) {
        let mut generation = 0;
        self.update(|s| {
            s.acw_generation += 1;
            generation = s.acw_generation;
        });

        let on_tick = {
            let weak = self.this.clone();
            move |left: u32| {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.update(|s| {
                        if s.acw_generation == generation {
                            s.acw_remaining = Some(left);
                        }
                    });
                }
            }
        };

        let on_complete = {
            let weak = self.this.clone();
            move || {
                tokio::spawn(async move {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.complete_acw(generation).await;
                    }
                });
            }
        };

        self.acw.start(seconds, on_tick, on_complete);
    }

    async fn complete_acw(&self, generation: u64) {
        let _gate = self.gate.lock().await;

        let current = {
            let state = self.state.lock();
            state.acw_generation == generation && state.status == AgentStatus::AfterCallWork
        };
        if !current {
            debug!("Stale ACW completion {} ignored", generation);
            return;
        }

        info!("⏰ ACW over, going available");
        if let Err(e) = self.change_status_locked(AgentStatus::Available).await {
            error!("Automatic return to available failed: {}", e);
            self.cancel_acw();
        }
    }

    fn cancel_acw(&self) {
        // The countdown's tick callback takes the state lock, so never hold
        // it across `acw` calls
        self.acw.cancel();
        self.update(|s| {
            s.acw_generation += 1;
            s.acw_remaining = None;
        });
    }
}

impl Drop for AgentStatusCoordinator {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}
