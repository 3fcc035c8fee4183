// src/services/call_state.rs
use crate::error::SoftphoneError;
use crate::models::{is_dtmf_digit, normalize_phone_number, CallState};
use crate::sdk::{SdkEvent, SdkEvents, TelephonySdk};
use crate::services::call_machine::{CallEvent, CallMachine, Effect, Rejected, SoftphoneSnapshot};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

const DURATION_TICK: Duration = Duration::from_secs(1);

impl From<SdkEvent> for CallEvent {
    fn from(event: SdkEvent) -> Self {
        match event {
            SdkEvent::Ringing { call_id } => CallEvent::Ringing { call_id },
            SdkEvent::Answered { call_id } => CallEvent::Answered { call_id },
            SdkEvent::Incoming { call_id, caller_number, caller_name } => {
                CallEvent::IncomingReceived { call_id, caller_number, caller_name }
            }
            SdkEvent::IncomingCancelled { call_id } => CallEvent::IncomingCancelled { call_id },
            SdkEvent::CallFailed { call_id, reason } => CallEvent::CallFailed {
                call_id: Some(call_id),
                reason,
            },
            SdkEvent::Hangup { call_id, cause } => CallEvent::Hangup { call_id, cause },
            SdkEvent::HoldChanged { call_id, on_hold } => CallEvent::HoldChanged {
                call_id: Some(call_id),
                on_hold,
            },
            SdkEvent::Disconnected { reason } => CallEvent::Disconnected { reason },
        }
    }
}

enum InitStep {
    AlreadyReady,
    InProgress,
    Start,
}

/// Owns the call machine and the SDK handle.
///
/// All call control goes through here; other components read
/// `SoftphoneSnapshot`s from `subscribe()`.
pub struct CallStateClient {
    sdk: Arc<dyn TelephonySdk>,
    machine: Mutex<CallMachine>,
    snapshot_tx: watch::Sender<SoftphoneSnapshot>,
    ended_display: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    this: Weak<CallStateClient>,
}

impl CallStateClient {
    pub fn new(sdk: Arc<dyn TelephonySdk>, ended_display: Duration) -> Arc<Self> {
        let machine = CallMachine::new();
        let (snapshot_tx, _) = watch::channel(machine.snapshot());

        Arc::new_cyclic(|this| Self {
            sdk,
            machine: Mutex::new(machine),
            snapshot_tx,
            ended_display,
            ticker: Mutex::new(None),
            event_pump: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SoftphoneSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SoftphoneSnapshot {
        self.machine.lock().snapshot()
    }

    pub fn is_ready(&self) -> bool {
        self.machine.lock().is_ready()
    }

    pub fn call_state(&self) -> CallState {
        self.machine.lock().state()
    }

    pub fn can_make_call(&self) -> bool {
        self.machine.lock().can_make_call()
    }

    fn current_call_id(&self) -> Option<String> {
        self.machine.lock().current_call_id().map(String::from)
    }

    // ==================== Connection ====================

    /// Connect the SDK. No-op when ready; joins an attempt already in flight.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), SoftphoneError> {
        match self.begin_initialize()? {
            InitStep::AlreadyReady => Ok(()),
            InitStep::InProgress => self.wait_for_initialization().await,
            InitStep::Start => {
                let this = self
                    .this
                    .upgrade()
                    .ok_or_else(|| SoftphoneError::Internal("client dropped".to_string()))?;

                // Runs to completion even if the caller stops waiting
                tokio::spawn(async move { this.connect_sdk().await })
                    .await
                    .map_err(|e| SoftphoneError::Internal(format!("connect task failed: {}", e)))?
            }
        }
    }

    fn begin_initialize(&self) -> Result<InitStep, SoftphoneError> {
        let mut machine = self.machine.lock();
        if machine.is_ready() {
            if machine.state() == CallState::Error {
                self.apply_locked(&mut machine, CallEvent::ErrorDismissed)
                    .map_err(invalid_transition)?;
            }
            return Ok(InitStep::AlreadyReady);
        }
        if machine.state() == CallState::Initializing {
            return Ok(InitStep::InProgress);
        }
        self.apply_locked(&mut machine, CallEvent::InitializeRequested)
            .map_err(invalid_transition)?;
        Ok(InitStep::Start)
    }

    async fn connect_sdk(&self) -> Result<(), SoftphoneError> {
        info!("🔌 Connecting softphone");

        match self.sdk.connect().await {
            Ok(events) => {
                // Events queue in the channel until the pump starts
                self.dispatch(CallEvent::SdkReady).map_err(invalid_transition)?;
                self.spawn_event_pump(events);
                info!("✅ Softphone ready");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!("❌ Softphone connection failed: {}", message);
                let _ = self.dispatch(CallEvent::SdkFailed { message: message.clone() });
                Err(SoftphoneError::ConnectionFailed(message))
            }
        }
    }

    async fn wait_for_initialization(&self) -> Result<(), SoftphoneError> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|s| s.call_state != CallState::Initializing)
            .await
            .map_err(|_| SoftphoneError::Internal("call state channel closed".to_string()))?
            .clone();

        if snapshot.is_ready {
            Ok(())
        } else {
            Err(SoftphoneError::ConnectionFailed(
                snapshot.error.unwrap_or_else(|| "connection failed".to_string()),
            ))
        }
    }

    /// Disconnect the SDK and drop any call state
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), SoftphoneError> {
        if let Some(pump) = self.event_pump.lock().take() {
            pump.abort();
        }
        let result = self.sdk.disconnect().await;
        let _ = self.dispatch(CallEvent::Shutdown);
        info!("🔌 Softphone disconnected");
        result.map_err(SoftphoneError::from)
    }

    fn spawn_event_pump(&self, mut events: SdkEvents) {
        let weak = self.this.clone();
        let handle = tokio::spawn(async move {
            // The SDK's own disconnect reason takes precedence over ours
            let mut disconnect_reported = false;
            while let Some(event) = events.recv().await {
                let Some(client) = weak.upgrade() else { return };
                disconnect_reported |= matches!(event, SdkEvent::Disconnected { .. });
                client.handle_sdk_event(event);
            }
            if disconnect_reported {
                return;
            }
            if let Some(client) = weak.upgrade() {
                warn!("SDK event stream closed");
                client.handle_sdk_event(SdkEvent::Disconnected {
                    reason: "event stream closed".to_string(),
                });
            }
        });

        if let Some(previous) = self.event_pump.lock().replace(handle) {
            previous.abort();
        }
    }

    fn handle_sdk_event(&self, event: SdkEvent) {
        let name = event.name();
        debug!("SDK event: {:?}", event);
        if let Err(rejected) = self.dispatch(event.into()) {
            debug!("Ignoring SDK event '{}' in state {}", name, rejected.state);
        }
    }

    // ==================== Outbound ====================

    #[instrument(skip(self))]
    pub async fn make_call(&self, number: &str, label: Option<String>) -> Result<(), SoftphoneError> {
        let number = normalize_phone_number(number);
        let seq = {
            let mut machine = self.machine.lock();
            if !machine.is_ready() {
                return Err(SoftphoneError::NotReady);
            }
            self.apply_locked(
                &mut machine,
                CallEvent::DialRequested { number: number.clone(), label },
            )
            .map_err(|_| SoftphoneError::CallInProgress)?;
            machine.call_seq()
        };

        info!("📞 Dialing {}", number);

        match self.sdk.make_call(&number).await {
            Ok(call_id) => {
                if !self.dispatch_for_call(seq, CallEvent::DialStarted { call_id: call_id.clone() }) {
                    self.run_effects(vec![Effect::HangupCall { call_id }]);
                }
                Ok(())
            }
            Err(e) => {
                warn!("❌ Call to {} failed: {}", number, e);
                self.dispatch_for_call(
                    seq,
                    CallEvent::CallFailed { call_id: None, reason: e.to_string() },
                );
                Err(e.into())
            }
        }
    }

    // ==================== Inbound ====================

    #[instrument(skip(self))]
    pub async fn answer_call(&self) -> Result<(), SoftphoneError> {
        let call_id = self
            .machine
            .lock()
            .incoming_call()
            .map(|incoming| incoming.call_id.clone())
            .ok_or(SoftphoneError::NoIncomingCall("answer"))?;

        self.sdk.answer_call(&call_id).await?;

        match self.dispatch(CallEvent::IncomingAnswered) {
            Ok(()) => Ok(()),
            // The switch's answer event got there first
            Err(_) if self.current_call_id().as_deref() == Some(call_id.as_str()) => Ok(()),
            Err(_) => Err(SoftphoneError::NoIncomingCall("answer")),
        }
    }

    #[instrument(skip(self))]
    pub async fn reject_call(&self) -> Result<(), SoftphoneError> {
        let call_id = self
            .machine
            .lock()
            .incoming_call()
            .map(|incoming| incoming.call_id.clone())
            .ok_or(SoftphoneError::NoIncomingCall("reject"))?;

        self.sdk.reject_call(&call_id).await?;
        let _ = self.dispatch(CallEvent::IncomingRejected);
        info!("🚫 Rejected incoming call {}", call_id);
        Ok(())
    }

    // ==================== In-call controls ====================

    #[instrument(skip(self))]
    pub async fn end_call(&self) -> Result<(), SoftphoneError> {
        let (state, call_id) = {
            let machine = self.machine.lock();
            (machine.state(), machine.current_call_id().map(String::from))
        };
        if !state.is_active() {
            return Err(SoftphoneError::InvalidTransition { action: "end the call", state });
        }

        // Without an id the dial is still in flight; DialStarted hangs it up
        if let Some(call_id) = call_id.as_deref() {
            self.sdk.end_call(call_id).await?;
        }

        match self.dispatch(CallEvent::EndRequested) {
            Ok(()) => Ok(()),
            Err(rejected) if !rejected.state.is_active() => Ok(()),
            Err(rejected) => Err(invalid_transition(rejected)),
        }
    }

    #[instrument(skip(self))]
    pub async fn toggle_mute(&self) -> Result<bool, SoftphoneError> {
        let (state, muted, call_id) = {
            let machine = self.machine.lock();
            (machine.state(), machine.is_muted(), machine.current_call_id().map(String::from))
        };
        if !state.is_talking() {
            return Err(SoftphoneError::InvalidTransition { action: "toggle mute", state });
        }
        let call_id = call_id.ok_or(SoftphoneError::NoActiveCall)?;

        let target = !muted;
        self.sdk.set_muted(&call_id, target).await?;
        self.dispatch(CallEvent::MuteChanged { muted: target })
            .map_err(invalid_transition)?;
        Ok(target)
    }

    #[instrument(skip(self))]
    pub async fn toggle_hold(&self) -> Result<bool, SoftphoneError> {
        let (state, on_hold, call_id) = {
            let machine = self.machine.lock();
            (machine.state(), machine.is_on_hold(), machine.current_call_id().map(String::from))
        };
        if !state.is_talking() {
            return Err(SoftphoneError::InvalidTransition { action: "toggle hold", state });
        }
        let call_id = call_id.ok_or(SoftphoneError::NoActiveCall)?;

        let target = !on_hold;
        self.sdk.set_on_hold(&call_id, target).await?;
        self.dispatch(CallEvent::HoldChanged { call_id: None, on_hold: target })
            .map_err(invalid_transition)?;
        Ok(target)
    }

    /// Forwarded only while connected; otherwise nothing reaches the SDK.
    #[instrument(skip(self))]
    pub async fn send_dtmf(&self, digit: char) -> Result<(), SoftphoneError> {
        if !is_dtmf_digit(digit) {
            return Err(SoftphoneError::Validation(format!("'{}' is not a DTMF digit", digit)));
        }

        let (state, call_id) = {
            let machine = self.machine.lock();
            (machine.state(), machine.current_call_id().map(String::from))
        };
        let call_id = match (state, call_id) {
            (CallState::Connected, Some(call_id)) => call_id,
            _ => {
                debug!("Dropping DTMF '{}' in state {}", digit, state);
                return Ok(());
            }
        };

        self.sdk.send_dtmf(&call_id, digit).await?;
        Ok(())
    }

    /// Leave the `ended` screen without waiting for the delay
    pub fn dismiss_ended(&self) -> Result<(), SoftphoneError> {
        self.dispatch(CallEvent::EndedDismissed)
            .map_err(invalid_transition)
    }

    // ==================== Machine plumbing ====================

    fn dispatch(&self, event: CallEvent) -> Result<(), Rejected> {
        let effects = {
            let mut machine = self.machine.lock();
            self.apply_locked(&mut machine, event)?
        };
        self.run_effects(effects);
        Ok(())
    }

    /// Applies `event` only if call number `seq` still owns the line
    fn dispatch_for_call(&self, seq: u64, event: CallEvent) -> bool {
        let effects = {
            let mut machine = self.machine.lock();
            if machine.call_seq() != seq {
                return false;
            }
            match self.apply_locked(&mut machine, event) {
                Ok(effects) => effects,
                Err(_) => return true,
            }
        };
        self.run_effects(effects);
        true
    }

    /// Apply and publish under the same lock so subscribers see states in order
    fn apply_locked(
        &self,
        machine: &mut CallMachine,
        event: CallEvent,
    ) -> Result<Vec<Effect>, Rejected> {
        let from = machine.state();
        let is_tick = event == CallEvent::Tick;
        let ending = if is_tick { None } else { machine.active_call().cloned() };
        let effects = machine.apply(event)?;
        let to = machine.state();

        if from != to {
            info!("📊 Call state: {} → {}", from, to);
            if let (Some(call), CallState::Ended) = (ending, to) {
                info!(
                    "📴 {} call with {} lasted {}",
                    call.direction.as_str(),
                    call.phone_number,
                    call.formatted_duration()
                );
            }
        }
        if !is_tick || to.is_talking() {
            self.snapshot_tx.send_replace(machine.snapshot());
        }
        Ok(effects)
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartTicker => self.start_ticker(),
                Effect::StopTicker => {
                    if let Some(ticker) = self.ticker.lock().take() {
                        ticker.abort();
                    }
                }
                Effect::ScheduleSettle { seq } => {
                    let weak = self.this.clone();
                    let delay = self.ended_display;
                    tokio::spawn(async move {
                        sleep(delay).await;
                        if let Some(client) = weak.upgrade() {
                            let _ = client.dispatch(CallEvent::EndSettled { seq });
                        }
                    });
                }
                Effect::RejectCall { call_id } => {
                    info!("🚫 Auto-rejecting call {}: line busy", call_id);
                    let sdk = self.sdk.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sdk.reject_call(&call_id).await {
                            error!("Failed to reject call {}: {}", call_id, e);
                        }
                    });
                }
                Effect::HangupCall { call_id } => {
                    info!("🔪 Hanging up abandoned call {}", call_id);
                    let sdk = self.sdk.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sdk.end_call(&call_id).await {
                            error!("Failed to hang up call {}: {}", call_id, e);
                        }
                    });
                }
            }
        }
    }

    fn start_ticker(&self) {
        let weak = self.this.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + DURATION_TICK, DURATION_TICK);
            loop {
                ticks.tick().await;
                let Some(client) = weak.upgrade() else { return };
                let _ = client.dispatch(CallEvent::Tick);
            }
        });

        if let Some(previous) = self.ticker.lock().replace(handle) {
            previous.abort();
        }
    }
}

fn invalid_transition(rejected: Rejected) -> SoftphoneError {
    SoftphoneError::InvalidTransition {
        action: rejected.event,
        state: rejected.state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{MockTelephonySdk, SdkError};
    use mockall::predicate::eq;
    use tokio::sync::mpsc;

    fn connected_sdk() -> (MockTelephonySdk, mpsc::Sender<SdkEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let mut sdk = MockTelephonySdk::new();
        let mut rx = Some(rx);
        sdk.expect_connect()
            .times(1)
            .returning(move || Ok(rx.take().expect("connect called twice")));
        (sdk, tx)
    }

    #[tokio::test]
    async fn test_initialize_connects_once() {
        let (sdk, _tx) = connected_sdk();
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));

        client.initialize().await.unwrap();
        client.initialize().await.unwrap();
        assert!(client.is_ready());
        assert_eq!(client.call_state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_initialize_failure_surfaces_message() {
        let mut sdk = MockTelephonySdk::new();
        sdk.expect_connect()
            .times(1)
            .returning(|| Err(SdkError::Authentication("invalid capability token".to_string())));
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));

        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, SoftphoneError::ConnectionFailed(ref m) if m.contains("invalid capability token")));
        let snapshot = client.snapshot();
        assert_eq!(snapshot.call_state, CallState::Error);
        assert!(!snapshot.is_ready);
    }

    #[tokio::test]
    async fn test_dtmf_ignored_unless_connected() {
        let (mut sdk, _tx) = connected_sdk();
        sdk.expect_send_dtmf().times(0);
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));
        client.initialize().await.unwrap();

        client.send_dtmf('5').await.unwrap();
    }

    #[tokio::test]
    async fn test_make_call_requires_ready() {
        let sdk = MockTelephonySdk::new();
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));
        let err = client.make_call("+254700000001", None).await.unwrap_err();
        assert!(matches!(err, SoftphoneError::NotReady));
    }

    #[tokio::test]
    async fn test_make_call_failure_leaves_no_active_call() {
        let (mut sdk, _tx) = connected_sdk();
        sdk.expect_make_call()
            .with(eq("+254700000001"))
            .times(1)
            .returning(|_| Err(SdkError::Command("-ERR NO_ROUTE_DESTINATION".to_string())));
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));
        client.initialize().await.unwrap();

        assert!(client.make_call("+254 700 000001", None).await.is_err());
        let snapshot = client.snapshot();
        assert_eq!(snapshot.call_state, CallState::Error);
        assert!(snapshot.active_call.is_none());
        assert!(snapshot.error.unwrap().contains("NO_ROUTE_DESTINATION"));
    }

    #[tokio::test]
    async fn test_toggle_mute_requires_talking() {
        let (sdk, _tx) = connected_sdk();
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));
        client.initialize().await.unwrap();

        let err = client.toggle_mute().await.unwrap_err();
        assert!(matches!(err, SoftphoneError::InvalidTransition { state: CallState::Idle, .. }));
    }

    #[tokio::test]
    async fn test_answer_without_incoming() {
        let (sdk, _tx) = connected_sdk();
        let client = CallStateClient::new(Arc::new(sdk), Duration::from_millis(10));
        client.initialize().await.unwrap();

        let err = client.answer_call().await.unwrap_err();
        assert!(matches!(err, SoftphoneError::NoIncomingCall("answer")));
    }
}
