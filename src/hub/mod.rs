//! Session hub
//!
//! Connections grouped into sessions, one master per session, fan-out with
//! bounded non-blocking delivery.

pub mod actor;
pub mod connection;
pub mod registry;

pub use actor::Hub;
pub use connection::{Connection, ConnectionId, ConnectionInfo, SendError};
pub use registry::{
    Delivery, HubSnapshot, MasterPolicy, Registration, Removal, SessionRegistry, SessionSnapshot,
};
