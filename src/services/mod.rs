// src/services/mod.rs
pub mod acw_countdown;
pub mod agent_status;
pub mod call_machine;
pub mod call_state;

pub use acw_countdown::AcwCountdown;
pub use agent_status::{AgentSnapshot, AgentStatusCoordinator};
pub use call_machine::{CallEvent, CallMachine, SoftphoneSnapshot};
pub use call_state::CallStateClient;
