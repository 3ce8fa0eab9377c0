//! Core types shared by the hub, the collector and the router
//!
//! - WebsocketEvent: the broadcast record
//! - TimeField: latency probe sample names
//! - messages: upstream payload shapes and the JSON decoder

pub mod event;
pub mod messages;
pub mod timing;

pub use event::{kinds, now_millis, EventType, WebsocketEvent, WILDCARD_USER};
pub use messages::{decode, Command, DebugInfo, DebugStart, DecodeError, VoiceInfo, VoiceResult};
pub use timing::TimeField;
