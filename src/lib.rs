//! Agent softphone
//!
//! Runs one call-center agent's softphone session:
//!
//! - Call state machine and call controls over a telephony SDK
//! - Agent presence kept in sync with the CRM backend
//! - After-Call-Work countdown between calls
//! - FreeSWITCH Event Socket binding of the SDK
//! - Local HTTP control API for the dashboard

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod esl;
pub mod models;
pub mod sdk;
pub mod services;

pub use config::AppConfig;
pub use error::{ApiError, SoftphoneError};

/// Result type alias using SoftphoneError
pub type SoftphoneResult<T> = Result<T, SoftphoneError>;
