// src/esl/channels.rs
use std::collections::HashMap;
use tracing::debug;

use crate::esl::event::EslEvent;
use crate::sdk::SdkEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegKind {
    Outbound,
    Inbound,
}

#[derive(Debug)]
struct Leg {
    kind: LegKind,
    ringing: bool,
    answered: bool,
}

/// Tracks the channels that belong to this agent and turns switch events
/// about them into `SdkEvent`s. Everything else on the switch is ignored.
#[derive(Debug)]
pub struct ChannelTracker {
    extension: String,
    legs: HashMap<String, Leg>,
    /// bgapi job id → originated channel
    jobs: HashMap<String, String>,
}

impl ChannelTracker {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            legs: HashMap::new(),
            jobs: HashMap::new(),
        }
    }

    /// Register a channel we are about to originate
    pub fn track_outbound(&mut self, call_id: &str) {
        self.legs.insert(
            call_id.to_string(),
            Leg { kind: LegKind::Outbound, ringing: false, answered: false },
        );
    }

    pub fn track_job(&mut self, job_uuid: &str, call_id: &str) {
        self.jobs.insert(job_uuid.to_string(), call_id.to_string());
    }

    /// Drop a channel whose originate was refused outright
    pub fn forget(&mut self, call_id: &str) {
        self.legs.remove(call_id);
        self.jobs.retain(|_, id| id.as_str() != call_id);
    }

    pub fn clear(&mut self) {
        self.legs.clear();
        self.jobs.clear();
    }

    pub fn is_tracked(&self, call_id: &str) -> bool {
        self.legs.contains_key(call_id)
    }

    pub fn handle(&mut self, event: &EslEvent) -> Option<SdkEvent> {
        let name = event.event_name()?;

        if name == "BACKGROUND_JOB" {
            return self.on_background_job(event);
        }

        let call_id = event.unique_id()?.to_string();

        match name {
            "CHANNEL_CREATE" => self.on_create(call_id, event),
            "CHANNEL_PROGRESS" | "CHANNEL_PROGRESS_MEDIA" => {
                let leg = self.legs.get_mut(&call_id)?;
                if leg.kind != LegKind::Outbound || leg.ringing || leg.answered {
                    return None;
                }
                leg.ringing = true;
                Some(SdkEvent::Ringing { call_id })
            }
            "CHANNEL_ANSWER" => {
                let leg = self.legs.get_mut(&call_id)?;
                if leg.answered {
                    return None;
                }
                leg.answered = true;
                Some(SdkEvent::Answered { call_id })
            }
            "CHANNEL_HOLD" | "CHANNEL_UNHOLD" => {
                if !self.is_tracked(&call_id) {
                    return None;
                }
                Some(SdkEvent::HoldChanged {
                    call_id,
                    on_hold: name == "CHANNEL_HOLD",
                })
            }
            "CHANNEL_HANGUP_COMPLETE" => {
                let leg = self.legs.remove(&call_id)?;
                self.jobs.retain(|_, id| *id != call_id);
                let cause = event.hangup_cause().unwrap_or("NORMAL_CLEARING").to_string();

                Some(match (leg.kind, leg.answered) {
                    (LegKind::Outbound, false) => SdkEvent::CallFailed { call_id, reason: cause },
                    (LegKind::Inbound, false) => SdkEvent::IncomingCancelled { call_id },
                    (_, true) => SdkEvent::Hangup { call_id, cause },
                })
            }
            _ => None,
        }
    }

    fn on_create(&mut self, call_id: String, event: &EslEvent) -> Option<SdkEvent> {
        if self.is_tracked(&call_id) {
            return None;
        }
        // The bridge leg of our own originate also rings the extension
        if event.other_leg().is_some_and(|other| self.is_tracked(other)) {
            return None;
        }
        if event.callee() != Some(self.extension.as_str()) {
            return None;
        }

        debug!("Inbound channel {} for extension {}", call_id, self.extension);
        self.legs.insert(
            call_id.clone(),
            Leg { kind: LegKind::Inbound, ringing: true, answered: false },
        );

        Some(SdkEvent::Incoming {
            call_id,
            caller_number: event.caller().unwrap_or("unknown").to_string(),
            caller_name: event.caller_name().map(String::from),
        })
    }

    fn on_background_job(&mut self, event: &EslEvent) -> Option<SdkEvent> {
        let call_id = self.jobs.remove(event.job_uuid()?)?;
        let result = event.body.as_deref().unwrap_or("").trim();
        if !result.starts_with("-ERR") {
            return None;
        }

        // A channel that never got created produces no hangup event
        let leg = self.legs.get(&call_id)?;
        if leg.answered {
            return None;
        }
        self.legs.remove(&call_id);

        let reason = result.trim_start_matches("-ERR").trim();
        Some(SdkEvent::CallFailed {
            call_id,
            reason: if reason.is_empty() { "originate failed".to_string() } else { reason.to_string() },
        })
    }
}
