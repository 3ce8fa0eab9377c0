//! Session registry - membership, master tracking and fan-out
//!
//! Plain single-owner state: the hub actor is the only caller, so nothing
//! here locks. Invariants held after every operation:
//! - a session is present iff it has at least one member
//! - its master is one of its members, and the only one flagged `is_master`
//! - a connection removed from a session has its outbound queue closed

use crate::core::WebsocketEvent;
use crate::hub::connection::{Connection, ConnectionId};
use crate::log_hub;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Level;

/// What happens to a session when its master leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterPolicy {
    /// Close every remaining member and drop the session
    #[default]
    Cascade,
    /// Promote the longest-standing remaining member
    Reelect,
}

/// Role granted on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Master,
    Member,
    /// Missing session id; the connection was closed
    Rejected,
}

/// Effect of removing a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Not a member (already removed, or never registered)
    NotMember,
    /// Ordinary member left; session still alive
    Member,
    /// Last member left; session dropped
    SessionClosed,
    /// Master left; `closed` remaining members were force-closed
    Teardown { closed: usize },
    /// Master left; another member took over
    Reelected { master: ConnectionId },
}

/// Fan-out result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
    pub teardowns: usize,
    /// Members force-closed by those teardowns
    pub closed: usize,
}

/// One named group of connections
struct Session {
    /// Join order, oldest first
    members: Vec<Arc<Connection>>,
    master: ConnectionId,
}

impl Session {
    fn position(&self, id: ConnectionId) -> Option<usize> {
        self.members.iter().position(|c| c.id() == id)
    }

    fn master(&self) -> Option<&Arc<Connection>> {
        self.members.iter().find(|c| c.id() == self.master)
    }
}

/// Read-only view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub master: u64,
    pub members: Vec<u64>,
}

/// Read-only view of the registry, sorted by session id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSnapshot {
    pub sessions: Vec<SessionSnapshot>,
}

impl HubSnapshot {
    pub fn session(&self, session_id: &str) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.iter().map(|s| s.members.len()).sum()
    }
}

/// Session map
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    policy: MasterPolicy,
}

impl SessionRegistry {
    pub fn new(policy: MasterPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> MasterPolicy {
        self.policy
    }

    /// Add a connection to its session, creating the session if needed
    ///
    /// The first registrant of a fresh session id becomes its master.
    pub fn register(&mut self, conn: Arc<Connection>) -> Registration {
        let session_id = conn.session_id().to_string();
        if session_id.is_empty() {
            log_hub!(Level::WARN, conn = %conn.id(), "rejecting connection without session id");
            conn.close();
            return Registration::Rejected;
        }

        let role = match self.sessions.get_mut(&session_id) {
            Some(session) => {
                if session.position(conn.id()).is_some() {
                    // Re-registration keeps whatever role it already has
                    return if session.master == conn.id() {
                        Registration::Master
                    } else {
                        Registration::Member
                    };
                }
                conn.set_master(false);
                session.members.push(conn.clone());
                Registration::Member
            }
            None => {
                conn.set_master(true);
                self.sessions.insert(
                    session_id.clone(),
                    Session {
                        members: vec![conn.clone()],
                        master: conn.id(),
                    },
                );
                Registration::Master
            }
        };

        log_hub!(
            Level::INFO,
            conn = %conn.id(),
            user = %conn.user_id(),
            cn = conn.info().client_cn.as_deref().unwrap_or("-"),
            session = %session_id,
            master = role == Registration::Master,
            size = self.member_count(&session_id),
            "client joined session"
        );
        role
    }

    /// Remove a connection; a no-op when it is not a member
    pub fn unregister(&mut self, conn: &Connection) -> Removal {
        let removal = self.remove_member(conn.session_id(), conn.id());
        if removal != Removal::NotMember {
            log_hub!(
                Level::INFO,
                conn = %conn.id(),
                user = %conn.user_id(),
                session = %conn.session_id(),
                ?removal,
                "client left session"
            );
        }
        removal
    }

    /// Fan an event out, evicting connections whose queue is full
    ///
    /// Wildcard target: one copy to each session master.
    /// Otherwise: every member of the event's session except the sender's user.
    pub fn broadcast(&mut self, event: &WebsocketEvent) -> Delivery {
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                log_hub!(Level::WARN, event_type = %event.event_type, error = %e, "failed to serialize event");
                return Delivery::default();
            }
        };

        let mut delivery = Delivery::default();
        let mut dead: Vec<(String, ConnectionId)> = Vec::new();

        if event.is_wildcard() {
            for (session_id, session) in &self.sessions {
                if let Some(master) = session.master() {
                    match master.try_send(payload.clone()) {
                        Ok(()) => delivery.delivered += 1,
                        Err(_) => dead.push((session_id.clone(), master.id())),
                    }
                }
            }
        } else if let Some(session) = self.sessions.get(&event.session_id) {
            for member in &session.members {
                if member.user_id() == event.user_id {
                    continue;
                }
                match member.try_send(payload.clone()) {
                    Ok(()) => delivery.delivered += 1,
                    Err(_) => dead.push((event.session_id.clone(), member.id())),
                }
            }
        }

        for (session_id, id) in dead {
            log_hub!(Level::WARN, conn = %id, session = %session_id, "outbound queue full, evicting client");
            match self.remove_member(&session_id, id) {
                Removal::NotMember => continue,
                Removal::Teardown { closed } => {
                    delivery.teardowns += 1;
                    delivery.closed += closed;
                }
                _ => {}
            }
            delivery.evicted.push(id);
        }

        log_hub!(
            Level::DEBUG,
            event_type = %event.event_type,
            delivered = delivery.delivered,
            evicted = delivery.evicted.len(),
            "broadcast event"
        );
        delivery
    }

    /// Shared removal path for unregistration and eviction
    fn remove_member(&mut self, session_id: &str, id: ConnectionId) -> Removal {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return Removal::NotMember;
        };
        let Some(idx) = session.position(id) else {
            return Removal::NotMember;
        };

        let leaving = session.members.remove(idx);
        leaving.set_master(false);
        leaving.close();

        let was_master = session.master == id;
        if !was_master && !session.members.is_empty() {
            return Removal::Member;
        }

        if was_master && self.policy == MasterPolicy::Reelect {
            if let Some(next) = session.members.first() {
                next.set_master(true);
                session.master = next.id();
                return Removal::Reelected { master: next.id() };
            }
        }

        let Some(session) = self.sessions.remove(session_id) else {
            return Removal::SessionClosed;
        };
        if session.members.is_empty() {
            return Removal::SessionClosed;
        }

        for member in &session.members {
            member.set_master(false);
            member.close();
        }
        log_hub!(
            Level::INFO,
            session = %session_id,
            closed = session.members.len(),
            "master left, session torn down"
        );
        Removal::Teardown {
            closed: session.members.len(),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn member_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|s| s.members.len())
            .unwrap_or(0)
    }

    pub fn master_of(&self, session_id: &str) -> Option<ConnectionId> {
        self.sessions.get(session_id).map(|s| s.master)
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|(id, s)| SessionSnapshot {
                session_id: id.clone(),
                master: s.master.0,
                members: s.members.iter().map(|c| c.id().0).collect(),
            })
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        HubSnapshot { sessions }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(MasterPolicy::default())
    }
}
