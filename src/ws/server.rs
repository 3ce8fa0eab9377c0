//! WebSocket upgrade handler
//!
//! `GET /ws?userId=&sessionId=&deviceId=`. TLS is terminated in front of the
//! relay; the terminator forwards the client certificate identity in headers.

use crate::hub::{Connection, ConnectionInfo};
use crate::infrastructure::api::AppState;
use crate::ws::pump::run_connection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use std::borrow::Cow;
use tracing::Level;

/// Common name of the verified client certificate
pub const CERT_CN_HEADER: &str = "x-client-cert-cn";
/// `"true"` / `"SUCCESS"` when the terminator verified the chain
pub const CERT_VERIFIED_HEADER: &str = "x-client-cert-verified";

/// Query parameters of the upgrade request
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub device_id: Option<String>,
}

impl HandshakeQuery {
    /// Identity for the new connection, or `None` without a user id
    ///
    /// Ids are lower-cased; the session defaults to the user.
    pub fn into_info(self, headers: &HeaderMap) -> Option<ConnectionInfo> {
        let user_id = normalize(self.user_id)?;
        let session_id = normalize(self.session_id).unwrap_or_default();
        let mut info = ConnectionInfo::new(user_id, session_id);
        if let Some(device) = normalize(self.device_id) {
            info = info.with_device(device);
        }

        let cn = header_str(headers, CERT_CN_HEADER).filter(|cn| !cn.is_empty());
        if let Some(cn) = cn {
            let verified = header_str(headers, CERT_VERIFIED_HEADER)
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("success"));
            info = info.with_certificate(cn, verified);
        }
        Some(info)
    }
}

fn normalize(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Upgrade handler mounted at `/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let settings = state.ws;
    let ws = ws.max_message_size(settings.max_message_bytes);

    let Some(info) = query.into_info(&headers) else {
        crate::log_ws!(Level::WARN, "handshake without userId rejected");
        return ws.on_upgrade(|socket| reject(socket, "userId required"));
    };

    if !info.verified {
        crate::log_ws!(
            Level::WARN,
            user = %info.user_id,
            client_cn = ?info.client_cn,
            "client certificate not verified"
        );
        if settings.require_verified_client {
            return ws.on_upgrade(|socket| reject(socket, "verified client certificate required"));
        }
    }

    let router = state.router.clone();
    ws.on_upgrade(move |socket| async move {
        let (conn, outbound) = Connection::new(info, settings.outbound_capacity);
        run_connection(socket, conn, outbound, router, settings).await;
    })
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = futures_util::SinkExt::send(&mut socket, Message::Close(Some(frame))).await {
        crate::log_ws!(Level::DEBUG, error = %e, "close after rejected handshake failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query(user: Option<&str>, session: Option<&str>) -> HandshakeQuery {
        HandshakeQuery {
            user_id: user.map(String::from),
            session_id: session.map(String::from),
            device_id: None,
        }
    }

    #[test]
    fn test_missing_user_rejected() {
        assert!(query(None, Some("room")).into_info(&HeaderMap::new()).is_none());
        assert!(query(Some("  "), None).into_info(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_ids_lowercased_and_session_defaults() {
        let info = query(Some("Alice"), None).into_info(&HeaderMap::new()).unwrap();
        assert_eq!(info.user_id, "alice");
        assert_eq!(info.session_id, "alice");
        assert!(!info.verified);

        let info = query(Some("Bob"), Some("Room-1")).into_info(&HeaderMap::new()).unwrap();
        assert_eq!(info.session_id, "room-1");
    }

    #[test]
    fn test_device_id_kept() {
        let mut q = query(Some("a"), None);
        q.device_id = Some("Headset-7".into());
        let info = q.into_info(&HeaderMap::new()).unwrap();
        assert_eq!(info.device_id, "headset-7");
    }

    #[test]
    fn test_certificate_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CERT_CN_HEADER, HeaderValue::from_static("visualiser-01"));
        headers.insert(CERT_VERIFIED_HEADER, HeaderValue::from_static("SUCCESS"));
        let info = query(Some("a"), None).into_info(&headers).unwrap();
        assert_eq!(info.client_cn.as_deref(), Some("visualiser-01"));
        assert!(info.verified);

        headers.insert(CERT_VERIFIED_HEADER, HeaderValue::from_static("FAILED:expired"));
        let info = query(Some("a"), None).into_info(&headers).unwrap();
        assert!(!info.verified);
    }
}
