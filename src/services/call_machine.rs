//! Call lifecycle state machine
//!
//! Pure and synchronous: every input is a `CallEvent`, `apply` routes it to
//! the transition function for that event and returns the side effects the
//! owner has to run (timers, SDK clean-up). An event that is illegal in the
//! current state is rejected and leaves the machine untouched.
//!
//! ```text
//! idle --initialize--> initializing --ready--> idle(ready)
//! idle(ready) --dial--> dialing --ringing--> ringing --answered--> connected
//! connected <--hold--> on_hold
//! dialing|ringing|connected|on_hold --end/hangup--> ended --settle--> idle
//! initializing|dialing|ringing --failure--> error
//! ```

use crate::models::{ActiveCall, CallState, EndedCall, IncomingCall};
use chrono::Utc;
use serde::Serialize;

/// Inputs to the machine: SDK notifications, agent actions and timers
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    InitializeRequested,
    SdkReady,
    SdkFailed { message: String },
    ErrorDismissed,
    DialRequested { number: String, label: Option<String> },
    /// The SDK accepted an outbound call and assigned it an id
    DialStarted { call_id: String },
    Ringing { call_id: String },
    Answered { call_id: String },
    /// `call_id` is `None` when `make_call` itself failed
    CallFailed { call_id: Option<String>, reason: String },
    Hangup { call_id: String, cause: String },
    IncomingReceived {
        call_id: String,
        caller_number: String,
        caller_name: Option<String>,
    },
    IncomingAnswered,
    IncomingRejected,
    IncomingCancelled { call_id: String },
    EndRequested,
    /// Ended display delay elapsed for call number `seq`
    EndSettled { seq: u64 },
    EndedDismissed,
    HoldChanged { call_id: Option<String>, on_hold: bool },
    MuteChanged { muted: bool },
    Tick,
    Disconnected { reason: String },
    Shutdown,
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::InitializeRequested => "initialize",
            CallEvent::SdkReady => "sdk_ready",
            CallEvent::SdkFailed { .. } => "sdk_failed",
            CallEvent::ErrorDismissed => "dismiss_error",
            CallEvent::DialRequested { .. } => "make a call",
            CallEvent::DialStarted { .. } => "dial_started",
            CallEvent::Ringing { .. } => "ringing",
            CallEvent::Answered { .. } => "answered",
            CallEvent::CallFailed { .. } => "call_failed",
            CallEvent::Hangup { .. } => "hangup",
            CallEvent::IncomingReceived { .. } => "incoming",
            CallEvent::IncomingAnswered => "answer",
            CallEvent::IncomingRejected => "reject",
            CallEvent::IncomingCancelled { .. } => "incoming_cancelled",
            CallEvent::EndRequested => "end the call",
            CallEvent::EndSettled { .. } => "end_settled",
            CallEvent::EndedDismissed => "dismiss",
            CallEvent::HoldChanged { .. } => "toggle hold",
            CallEvent::MuteChanged { .. } => "toggle mute",
            CallEvent::Tick => "tick",
            CallEvent::Disconnected { .. } => "disconnected",
            CallEvent::Shutdown => "shutdown",
        }
    }
}

/// Work the owner of the machine must carry out after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartTicker,
    StopTicker,
    /// Return to idle after the ended display delay, if still on call `seq`
    ScheduleSettle { seq: u64 },
    /// Second inbound call while busy
    RejectCall { call_id: String },
    /// An outbound leg that got its id after the call was already over
    HangupCall { call_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub event: &'static str,
    pub state: CallState,
}

pub type TransitionResult = Result<Vec<Effect>, Rejected>;

/// Read-only view handed to subscribers
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SoftphoneSnapshot {
    pub call_state: CallState,
    pub is_ready: bool,
    pub can_make_call: bool,
    pub is_muted: bool,
    pub is_on_hold: bool,
    pub active_call: Option<ActiveCall>,
    pub incoming_call: Option<IncomingCall>,
    pub ended_call: Option<EndedCall>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CallMachine {
    state: CallState,
    is_ready: bool,
    is_muted: bool,
    is_on_hold: bool,
    active_call: Option<ActiveCall>,
    incoming_call: Option<IncomingCall>,
    ended_call: Option<EndedCall>,
    error: Option<String>,
    call_seq: u64,
}

impl Default for CallMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            is_ready: false,
            is_muted: false,
            is_on_hold: false,
            active_call: None,
            incoming_call: None,
            ended_call: None,
            error: None,
            call_seq: 0,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_on_hold(&self) -> bool {
        self.is_on_hold
    }

    pub fn active_call(&self) -> Option<&ActiveCall> {
        self.active_call.as_ref()
    }

    pub fn incoming_call(&self) -> Option<&IncomingCall> {
        self.incoming_call.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn call_seq(&self) -> u64 {
        self.call_seq
    }

    /// SDK id of the call currently owning the line
    pub fn current_call_id(&self) -> Option<&str> {
        self.active_call
            .as_ref()
            .and_then(|c| c.call_log_id.as_deref())
    }

    pub fn can_make_call(&self) -> bool {
        self.is_ready
            && matches!(self.state, CallState::Idle | CallState::Ended | CallState::Error)
            && self.active_call.is_none()
            && self.incoming_call.is_none()
    }

    pub fn snapshot(&self) -> SoftphoneSnapshot {
        SoftphoneSnapshot {
            call_state: self.state,
            is_ready: self.is_ready,
            can_make_call: self.can_make_call(),
            is_muted: self.is_muted,
            is_on_hold: self.is_on_hold,
            active_call: self.active_call.clone(),
            incoming_call: self.incoming_call.clone(),
            ended_call: self.ended_call.clone(),
            error: self.error.clone(),
        }
    }

    /// `ActiveCall` exists iff the state is an in-call state, and the line
    /// never holds an active and an incoming call together.
    pub fn invariants_hold(&self) -> bool {
        self.active_call.is_some() == self.state.is_active()
            && !(self.active_call.is_some() && self.incoming_call.is_some())
            && self.is_on_hold == (self.state == CallState::OnHold)
            && (!self.is_muted || self.state.is_talking())
    }

    /// Route an event to its transition
    pub fn apply(&mut self, event: CallEvent) -> TransitionResult {
        let name = event.name();
        match event {
            CallEvent::InitializeRequested => self.on_initialize_requested(name),
            CallEvent::SdkReady => self.on_sdk_ready(name),
            CallEvent::SdkFailed { message } => self.on_sdk_failed(name, message),
            CallEvent::ErrorDismissed => self.on_error_dismissed(name),
            CallEvent::DialRequested { number, label } => self.on_dial_requested(name, number, label),
            CallEvent::DialStarted { call_id } => self.on_dial_started(call_id),
            CallEvent::Ringing { call_id } => self.on_ringing(name, call_id),
            CallEvent::Answered { call_id } => self.on_answered(name, call_id),
            CallEvent::CallFailed { call_id, reason } => self.on_call_failed(name, call_id, reason),
            CallEvent::Hangup { call_id, cause } => self.on_hangup(name, call_id, cause),
            CallEvent::IncomingReceived { call_id, caller_number, caller_name } => {
                self.on_incoming(name, call_id, caller_number, caller_name)
            }
            CallEvent::IncomingAnswered => self.on_incoming_answered(name),
            CallEvent::IncomingRejected => self.on_incoming_rejected(name),
            CallEvent::IncomingCancelled { call_id } => self.on_incoming_cancelled(name, call_id),
            CallEvent::EndRequested => self.on_end_requested(name),
            CallEvent::EndSettled { seq } => self.on_end_settled(name, seq),
            CallEvent::EndedDismissed => self.on_ended_dismissed(name),
            CallEvent::HoldChanged { call_id, on_hold } => self.on_hold_changed(name, call_id, on_hold),
            CallEvent::MuteChanged { muted } => self.on_mute_changed(name, muted),
            CallEvent::Tick => self.on_tick(),
            CallEvent::Disconnected { reason } => self.on_disconnected(reason),
            CallEvent::Shutdown => self.on_shutdown(),
        }
    }

    fn reject(&self, event: &'static str) -> TransitionResult {
        Err(Rejected { event, state: self.state })
    }

    /// Outbound call matching: an id not learned yet is adopted
    fn matches_active(&mut self, call_id: &str) -> bool {
        match self.active_call.as_mut() {
            Some(call) => match call.call_log_id.as_deref() {
                Some(id) => id == call_id,
                None => {
                    call.call_log_id = Some(call_id.to_string());
                    true
                }
            },
            None => false,
        }
    }

    fn finish_call(&mut self, reason: String) -> Vec<Effect> {
        if let Some(call) = self.active_call.take() {
            self.ended_call = Some(EndedCall::from_active(call, reason));
        }
        self.state = CallState::Ended;
        self.is_muted = false;
        self.is_on_hold = false;
        vec![Effect::StopTicker, Effect::ScheduleSettle { seq: self.call_seq }]
    }

    // ==================== Connection ====================

    fn on_initialize_requested(&mut self, name: &'static str) -> TransitionResult {
        if self.is_ready || !matches!(self.state, CallState::Idle | CallState::Error | CallState::Ended) {
            return self.reject(name);
        }
        self.state = CallState::Initializing;
        self.error = None;
        self.ended_call = None;
        Ok(vec![])
    }

    fn on_sdk_ready(&mut self, name: &'static str) -> TransitionResult {
        if self.state != CallState::Initializing {
            return self.reject(name);
        }
        self.state = CallState::Idle;
        self.is_ready = true;
        self.error = None;
        Ok(vec![])
    }

    fn on_sdk_failed(&mut self, name: &'static str, message: String) -> TransitionResult {
        if self.state != CallState::Initializing {
            return self.reject(name);
        }
        self.state = CallState::Error;
        self.is_ready = false;
        self.error = Some(message);
        Ok(vec![])
    }

    fn on_error_dismissed(&mut self, name: &'static str) -> TransitionResult {
        if self.state != CallState::Error || !self.is_ready {
            return self.reject(name);
        }
        self.state = CallState::Idle;
        self.error = None;
        Ok(vec![])
    }

    fn on_disconnected(&mut self, reason: String) -> TransitionResult {
        self.is_ready = false;
        self.incoming_call = None;
        self.error = Some(reason.clone());

        match self.state {
            CallState::Connected | CallState::OnHold => Ok(self.finish_call(reason)),
            CallState::Dialing | CallState::Ringing => {
                self.active_call = None;
                self.state = CallState::Error;
                Ok(vec![Effect::StopTicker])
            }
            CallState::Ended => Ok(vec![]),
            _ => {
                self.state = CallState::Error;
                Ok(vec![])
            }
        }
    }

    fn on_shutdown(&mut self) -> TransitionResult {
        *self = Self { call_seq: self.call_seq, ..Self::new() };
        Ok(vec![Effect::StopTicker])
    }

    // ==================== Outbound ====================

    fn on_dial_requested(
        &mut self,
        name: &'static str,
        number: String,
        label: Option<String>,
    ) -> TransitionResult {
        if !self.can_make_call() {
            return self.reject(name);
        }
        self.call_seq += 1;
        self.state = CallState::Dialing;
        self.error = None;
        self.ended_call = None;
        self.is_muted = false;
        self.is_on_hold = false;
        self.active_call = Some(ActiveCall::outbound(number, label));
        Ok(vec![])
    }

    fn on_dial_started(&mut self, call_id: String) -> TransitionResult {
        if matches!(self.state, CallState::Dialing | CallState::Ringing | CallState::Connected)
            && self.matches_active(&call_id)
        {
            return Ok(vec![]);
        }
        // The agent hung up before the SDK handed back the id
        Ok(vec![Effect::HangupCall { call_id }])
    }

    fn on_ringing(&mut self, name: &'static str, call_id: String) -> TransitionResult {
        if self.state != CallState::Dialing || !self.matches_active(&call_id) {
            return self.reject(name);
        }
        self.state = CallState::Ringing;
        Ok(vec![])
    }

    fn on_answered(&mut self, name: &'static str, call_id: String) -> TransitionResult {
        let is_pending_incoming = self
            .incoming_call
            .as_ref()
            .is_some_and(|incoming| incoming.call_id == call_id);
        if is_pending_incoming {
            return self.on_incoming_answered(name);
        }

        if !matches!(self.state, CallState::Dialing | CallState::Ringing)
            || !self.matches_active(&call_id)
        {
            return self.reject(name);
        }
        self.state = CallState::Connected;
        if let Some(call) = self.active_call.as_mut() {
            call.started_at = Utc::now();
        }
        Ok(vec![Effect::StartTicker])
    }

    fn on_call_failed(
        &mut self,
        name: &'static str,
        call_id: Option<String>,
        reason: String,
    ) -> TransitionResult {
        let matches = match call_id.as_deref() {
            Some(id) => self.matches_active(id),
            None => self.active_call.is_some(),
        };
        if !matches {
            return self.reject(name);
        }

        match self.state {
            CallState::Dialing | CallState::Ringing => {
                self.active_call = None;
                self.state = CallState::Error;
                self.error = Some(reason);
                Ok(vec![])
            }
            CallState::Connected | CallState::OnHold => Ok(self.finish_call(reason)),
            _ => self.reject(name),
        }
    }

    fn on_hangup(&mut self, name: &'static str, call_id: String, cause: String) -> TransitionResult {
        if self
            .incoming_call
            .as_ref()
            .is_some_and(|incoming| incoming.call_id == call_id)
        {
            self.incoming_call = None;
            return Ok(vec![]);
        }

        if !self.state.is_active() || !self.matches_active(&call_id) {
            return self.reject(name);
        }
        Ok(self.finish_call(cause))
    }

    fn on_end_requested(&mut self, name: &'static str) -> TransitionResult {
        if !self.state.is_active() {
            return self.reject(name);
        }
        Ok(self.finish_call("agent_hangup".to_string()))
    }

    fn on_end_settled(&mut self, name: &'static str, seq: u64) -> TransitionResult {
        if self.state != CallState::Ended || seq != self.call_seq {
            return self.reject(name);
        }
        self.state = CallState::Idle;
        self.ended_call = None;
        Ok(vec![])
    }

    fn on_ended_dismissed(&mut self, name: &'static str) -> TransitionResult {
        if self.state != CallState::Ended {
            return self.reject(name);
        }
        self.state = CallState::Idle;
        self.ended_call = None;
        Ok(vec![])
    }

    // ==================== Inbound ====================

    fn on_incoming(
        &mut self,
        name: &'static str,
        call_id: String,
        caller_number: String,
        caller_name: Option<String>,
    ) -> TransitionResult {
        if !self.is_ready {
            return self.reject(name);
        }
        if self.active_call.is_some() || self.incoming_call.is_some() {
            return Ok(vec![Effect::RejectCall { call_id }]);
        }
        self.incoming_call = Some(IncomingCall {
            call_id,
            caller_number,
            caller_name,
            received_at: Utc::now(),
        });
        Ok(vec![])
    }

    fn on_incoming_answered(&mut self, name: &'static str) -> TransitionResult {
        if self.active_call.is_some() {
            return self.reject(name);
        }
        let Some(incoming) = self.incoming_call.take() else {
            return self.reject(name);
        };
        self.call_seq += 1;
        self.state = CallState::Connected;
        self.error = None;
        self.ended_call = None;
        self.is_muted = false;
        self.is_on_hold = false;
        self.active_call = Some(ActiveCall::from_incoming(incoming));
        Ok(vec![Effect::StartTicker])
    }

    fn on_incoming_rejected(&mut self, name: &'static str) -> TransitionResult {
        if self.incoming_call.take().is_none() {
            return self.reject(name);
        }
        Ok(vec![])
    }

    fn on_incoming_cancelled(&mut self, name: &'static str, call_id: String) -> TransitionResult {
        match self.incoming_call.as_ref() {
            Some(incoming) if incoming.call_id == call_id => {
                self.incoming_call = None;
                Ok(vec![])
            }
            _ => self.reject(name),
        }
    }

    // ==================== In-call controls ====================

    fn on_hold_changed(
        &mut self,
        name: &'static str,
        call_id: Option<String>,
        on_hold: bool,
    ) -> TransitionResult {
        if let Some(id) = call_id.as_deref() {
            if !self.state.is_talking() || !self.matches_active(id) {
                return self.reject(name);
            }
        }
        match (self.state, on_hold) {
            (CallState::Connected, true) => self.state = CallState::OnHold,
            (CallState::OnHold, false) => self.state = CallState::Connected,
            (CallState::Connected, false) | (CallState::OnHold, true) => {}
            _ => return self.reject(name),
        }
        self.is_on_hold = on_hold;
        Ok(vec![])
    }

    fn on_mute_changed(&mut self, name: &'static str, muted: bool) -> TransitionResult {
        if !self.state.is_talking() {
            return self.reject(name);
        }
        self.is_muted = muted;
        Ok(vec![])
    }

    /// Duration keeps counting on hold; the backend bills hold time too.
    fn on_tick(&mut self) -> TransitionResult {
        if self.state.is_talking() {
            if let Some(call) = self.active_call.as_mut() {
                call.duration += 1;
            }
        }
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ready_machine() -> CallMachine {
        let mut machine = CallMachine::new();
        machine.apply(CallEvent::InitializeRequested).unwrap();
        machine.apply(CallEvent::SdkReady).unwrap();
        machine
    }

    fn dial(machine: &mut CallMachine, call_id: &str) {
        machine
            .apply(CallEvent::DialRequested { number: "+254700000001".to_string(), label: None })
            .unwrap();
        machine
            .apply(CallEvent::DialStarted { call_id: call_id.to_string() })
            .unwrap();
    }

    fn connected_machine() -> CallMachine {
        let mut machine = ready_machine();
        dial(&mut machine, "c1");
        machine.apply(CallEvent::Ringing { call_id: "c1".to_string() }).unwrap();
        machine.apply(CallEvent::Answered { call_id: "c1".to_string() }).unwrap();
        machine
    }

    #[test]
    fn test_initialize_success() {
        let mut machine = CallMachine::new();
        machine.apply(CallEvent::InitializeRequested).unwrap();
        assert_eq!(machine.state(), CallState::Initializing);
        machine.apply(CallEvent::SdkReady).unwrap();
        assert_eq!(machine.state(), CallState::Idle);
        assert!(machine.is_ready());
    }

    #[test]
    fn test_initialize_failure_sets_error() {
        let mut machine = CallMachine::new();
        machine.apply(CallEvent::InitializeRequested).unwrap();
        machine
            .apply(CallEvent::SdkFailed { message: "token rejected".to_string() })
            .unwrap();
        assert_eq!(machine.state(), CallState::Error);
        assert_eq!(machine.error(), Some("token rejected"));
        assert!(!machine.is_ready());

        // Retry is allowed from error
        machine.apply(CallEvent::InitializeRequested).unwrap();
        assert_eq!(machine.state(), CallState::Initializing);
        assert!(machine.error().is_none());
    }

    #[test]
    fn test_initialize_rejected_when_in_progress_or_ready() {
        let mut machine = CallMachine::new();
        machine.apply(CallEvent::InitializeRequested).unwrap();
        assert!(machine.apply(CallEvent::InitializeRequested).is_err());

        let mut machine = ready_machine();
        assert!(machine.apply(CallEvent::InitializeRequested).is_err());
    }

    #[test]
    fn test_outbound_lifecycle() {
        let mut machine = ready_machine();
        dial(&mut machine, "c1");
        assert_eq!(machine.state(), CallState::Dialing);
        assert_eq!(machine.current_call_id(), Some("c1"));

        machine.apply(CallEvent::Ringing { call_id: "c1".to_string() }).unwrap();
        assert_eq!(machine.state(), CallState::Ringing);

        let effects = machine.apply(CallEvent::Answered { call_id: "c1".to_string() }).unwrap();
        assert_eq!(effects, vec![Effect::StartTicker]);
        assert_eq!(machine.state(), CallState::Connected);

        let effects = machine.apply(CallEvent::EndRequested).unwrap();
        assert_eq!(
            effects,
            vec![Effect::StopTicker, Effect::ScheduleSettle { seq: 1 }]
        );
        assert_eq!(machine.state(), CallState::Ended);
        assert!(machine.active_call().is_none());
        assert_eq!(machine.snapshot().ended_call.unwrap().reason, "agent_hangup");

        machine.apply(CallEvent::EndSettled { seq: 1 }).unwrap();
        assert_eq!(machine.state(), CallState::Idle);
        assert!(machine.snapshot().ended_call.is_none());
    }

    #[test]
    fn test_dial_requires_ready() {
        let mut machine = CallMachine::new();
        let result = machine.apply(CallEvent::DialRequested { number: "100".to_string(), label: None });
        assert_eq!(
            result,
            Err(Rejected { event: "make a call", state: CallState::Idle })
        );
    }

    #[test]
    fn test_dial_rejected_while_in_call() {
        let mut machine = connected_machine();
        assert!(machine
            .apply(CallEvent::DialRequested { number: "200".to_string(), label: None })
            .is_err());
        assert_eq!(machine.current_call_id(), Some("c1"));
    }

    #[test]
    fn test_events_adopt_unknown_outbound_id() {
        let mut machine = ready_machine();
        machine
            .apply(CallEvent::DialRequested { number: "100".to_string(), label: None })
            .unwrap();
        machine.apply(CallEvent::Ringing { call_id: "early".to_string() }).unwrap();
        assert_eq!(machine.current_call_id(), Some("early"));
        // Late reply from make_call for the same call
        assert!(machine
            .apply(CallEvent::DialStarted { call_id: "early".to_string() })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_stale_events_are_rejected() {
        let mut machine = connected_machine();
        assert!(machine.apply(CallEvent::Ringing { call_id: "other".to_string() }).is_err());
        assert!(machine
            .apply(CallEvent::Hangup { call_id: "other".to_string(), cause: "x".to_string() })
            .is_err());
        assert_eq!(machine.state(), CallState::Connected);
    }

    #[test]
    fn test_dial_started_after_end_hangs_up_orphan() {
        let mut machine = ready_machine();
        machine
            .apply(CallEvent::DialRequested { number: "100".to_string(), label: None })
            .unwrap();
        machine.apply(CallEvent::EndRequested).unwrap();
        let effects = machine
            .apply(CallEvent::DialStarted { call_id: "late".to_string() })
            .unwrap();
        assert_eq!(effects, vec![Effect::HangupCall { call_id: "late".to_string() }]);
    }

    #[test]
    fn test_failure_before_connect_goes_to_error_without_call() {
        let mut machine = ready_machine();
        dial(&mut machine, "c1");
        machine
            .apply(CallEvent::CallFailed { call_id: Some("c1".to_string()), reason: "USER_BUSY".to_string() })
            .unwrap();
        assert_eq!(machine.state(), CallState::Error);
        assert!(machine.active_call().is_none());
        assert_eq!(machine.error(), Some("USER_BUSY"));
        // Still registered, so a new call may be placed
        assert!(machine.can_make_call());
    }

    #[test]
    fn test_failure_after_connect_ends_call() {
        let mut machine = connected_machine();
        machine
            .apply(CallEvent::CallFailed { call_id: Some("c1".to_string()), reason: "MEDIA_TIMEOUT".to_string() })
            .unwrap();
        assert_eq!(machine.state(), CallState::Ended);
        assert!(machine.active_call().is_none());
    }

    #[test]
    fn test_remote_hangup_ends_call() {
        let mut machine = connected_machine();
        machine
            .apply(CallEvent::Hangup { call_id: "c1".to_string(), cause: "NORMAL_CLEARING".to_string() })
            .unwrap();
        assert_eq!(machine.state(), CallState::Ended);
        assert_eq!(machine.snapshot().ended_call.unwrap().reason, "NORMAL_CLEARING");
    }

    #[test]
    fn test_stale_settle_does_not_clear_newer_call() {
        let mut machine = connected_machine();
        machine.apply(CallEvent::EndRequested).unwrap();
        dial(&mut machine, "c2");
        assert!(machine.apply(CallEvent::EndSettled { seq: 1 }).is_err());
        assert_eq!(machine.state(), CallState::Dialing);
        assert_eq!(machine.call_seq(), 2);
    }

    #[test]
    fn test_incoming_answer() {
        let mut machine = ready_machine();
        machine
            .apply(CallEvent::IncomingReceived {
                call_id: "in1".to_string(),
                caller_number: "+254711000000".to_string(),
                caller_name: Some("Jane".to_string()),
            })
            .unwrap();
        assert_eq!(machine.state(), CallState::Idle);
        assert!(machine.incoming_call().is_some());
        assert!(!machine.can_make_call());

        let effects = machine.apply(CallEvent::IncomingAnswered).unwrap();
        assert_eq!(effects, vec![Effect::StartTicker]);
        assert_eq!(machine.state(), CallState::Connected);
        assert!(machine.incoming_call().is_none());
        let call = machine.active_call().unwrap();
        assert_eq!(call.phone_number, "+254711000000");
        assert_eq!(call.contact_name.as_deref(), Some("Jane"));
        assert_eq!(call.call_log_id.as_deref(), Some("in1"));
    }

    #[test]
    fn test_incoming_reject_restores_prior_state() {
        let mut machine = ready_machine();
        machine
            .apply(CallEvent::IncomingReceived {
                call_id: "in1".to_string(),
                caller_number: "100".to_string(),
                caller_name: None,
            })
            .unwrap();
        machine.apply(CallEvent::IncomingRejected).unwrap();
        assert_eq!(machine.state(), CallState::Idle);
        assert!(machine.incoming_call().is_none());
        assert!(machine.apply(CallEvent::IncomingRejected).is_err());
    }

    #[test]
    fn test_second_incoming_is_auto_rejected() {
        let mut machine = connected_machine();
        let effects = machine
            .apply(CallEvent::IncomingReceived {
                call_id: "in2".to_string(),
                caller_number: "100".to_string(),
                caller_name: None,
            })
            .unwrap();
        assert_eq!(effects, vec![Effect::RejectCall { call_id: "in2".to_string() }]);
        assert!(machine.incoming_call().is_none());
        assert_eq!(machine.state(), CallState::Connected);
    }

    #[test]
    fn test_incoming_cancelled_by_caller() {
        let mut machine = ready_machine();
        machine
            .apply(CallEvent::IncomingReceived {
                call_id: "in1".to_string(),
                caller_number: "100".to_string(),
                caller_name: None,
            })
            .unwrap();
        machine
            .apply(CallEvent::Hangup { call_id: "in1".to_string(), cause: "ORIGINATOR_CANCEL".to_string() })
            .unwrap();
        assert!(machine.incoming_call().is_none());
        assert_eq!(machine.state(), CallState::Idle);
    }

    #[test]
    fn test_hold_round_trip() {
        let mut machine = connected_machine();
        machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: true }).unwrap();
        assert_eq!(machine.state(), CallState::OnHold);
        assert!(machine.is_on_hold());
        machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: false }).unwrap();
        assert_eq!(machine.state(), CallState::Connected);
        assert!(!machine.is_on_hold());
    }

    #[test]
    fn test_hold_requires_connected_call() {
        let mut machine = ready_machine();
        dial(&mut machine, "c1");
        assert!(machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: true }).is_err());
    }

    #[test]
    fn test_duration_counts_while_connected_and_on_hold() {
        let mut machine = connected_machine();
        machine.apply(CallEvent::Tick).unwrap();
        machine.apply(CallEvent::Tick).unwrap();
        machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: true }).unwrap();
        machine.apply(CallEvent::Tick).unwrap();
        assert_eq!(machine.active_call().unwrap().duration, 3);
    }

    #[test]
    fn test_duration_does_not_count_while_ringing() {
        let mut machine = ready_machine();
        dial(&mut machine, "c1");
        machine.apply(CallEvent::Tick).unwrap();
        assert_eq!(machine.active_call().unwrap().duration, 0);
    }

    #[test]
    fn test_disconnect_mid_call_ends_call() {
        let mut machine = connected_machine();
        machine.apply(CallEvent::Disconnected { reason: "socket closed".to_string() }).unwrap();
        assert_eq!(machine.state(), CallState::Ended);
        assert!(!machine.is_ready());
        assert_eq!(machine.error(), Some("socket closed"));
    }

    #[test]
    fn test_disconnect_when_idle_is_error() {
        let mut machine = ready_machine();
        machine.apply(CallEvent::Disconnected { reason: "socket closed".to_string() }).unwrap();
        assert_eq!(machine.state(), CallState::Error);
        assert!(!machine.is_ready());
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let mut machine = connected_machine();
        machine.apply(CallEvent::Shutdown).unwrap();
        assert_eq!(machine.state(), CallState::Idle);
        assert!(!machine.is_ready());
        assert!(machine.active_call().is_none());
        assert_eq!(machine.call_seq(), 1);
    }

    fn arb_event() -> impl Strategy<Value = CallEvent> {
        let id = prop_oneof![Just("c1".to_string()), Just("c2".to_string()), Just("in1".to_string())];
        prop_oneof![
            Just(CallEvent::InitializeRequested),
            Just(CallEvent::SdkReady),
            Just(CallEvent::SdkFailed { message: "fail".to_string() }),
            Just(CallEvent::ErrorDismissed),
            Just(CallEvent::DialRequested { number: "100".to_string(), label: None }),
            id.clone().prop_map(|call_id| CallEvent::DialStarted { call_id }),
            id.clone().prop_map(|call_id| CallEvent::Ringing { call_id }),
            id.clone().prop_map(|call_id| CallEvent::Answered { call_id }),
            id.clone().prop_map(|call_id| CallEvent::CallFailed { call_id: Some(call_id), reason: "x".to_string() }),
            id.clone().prop_map(|call_id| CallEvent::Hangup { call_id, cause: "x".to_string() }),
            id.clone().prop_map(|call_id| CallEvent::IncomingReceived {
                call_id,
                caller_number: "200".to_string(),
                caller_name: None,
            }),
            Just(CallEvent::IncomingAnswered),
            Just(CallEvent::IncomingRejected),
            id.clone().prop_map(|call_id| CallEvent::IncomingCancelled { call_id }),
            Just(CallEvent::EndRequested),
            (0u64..4).prop_map(|seq| CallEvent::EndSettled { seq }),
            Just(CallEvent::EndedDismissed),
            any::<bool>().prop_map(|on_hold| CallEvent::HoldChanged { call_id: None, on_hold }),
            any::<bool>().prop_map(|muted| CallEvent::MuteChanged { muted }),
            Just(CallEvent::Tick),
            Just(CallEvent::Disconnected { reason: "drop".to_string() }),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_for_any_event_sequence(events in prop::collection::vec(arb_event(), 0..60)) {
            let mut machine = CallMachine::new();
            for event in events {
                let before = machine.clone();
                let result = machine.apply(event);
                prop_assert!(machine.invariants_hold(), "invariants broken: {:?}", machine);
                if result.is_err() {
                    prop_assert_eq!(before.snapshot(), machine.snapshot());
                }
            }
        }

        #[test]
        fn prop_hold_toggle_is_a_round_trip(ticks in 0usize..5, start_on_hold in any::<bool>()) {
            let mut machine = connected_machine();
            if start_on_hold {
                machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: true }).unwrap();
            }
            for _ in 0..ticks {
                machine.apply(CallEvent::Tick).unwrap();
            }
            let original = machine.state();
            let first = !machine.is_on_hold();
            machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: first }).unwrap();
            machine.apply(CallEvent::HoldChanged { call_id: None, on_hold: !first }).unwrap();
            prop_assert_eq!(machine.state(), original);
        }
    }
}
