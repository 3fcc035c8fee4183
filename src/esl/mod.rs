// src/esl/mod.rs
pub mod channels;
pub mod codec;
pub mod event;
pub mod softphone;

pub use channels::ChannelTracker;
pub use codec::{EslCodec, EslFrame};
pub use event::EslEvent;
pub use softphone::EslSoftphone;
