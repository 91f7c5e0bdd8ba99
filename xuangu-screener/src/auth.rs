//! Session gate for the screening routes.
//!
//! Sessions are issued by the account service and stored as
//! `session:{token}` hashes with `user_id`, `username`, `roles`,
//! `permissions` (JSON arrays) and `expire_time`. Expired sessions are
//! deleted on first sight.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ScreenerError;
use crate::keys;
use crate::store::{KvStore, StoreResult, WriteBatch};

/// Authenticated session, available to handlers as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl Session {
    fn from_hash(hash: &HashMap<String, String>) -> Self {
        let field = |name: &str| hash.get(name).cloned().unwrap_or_default();
        Self {
            user_id: field("user_id"),
            username: field("username"),
            roles: parse_list(hash.get("roles")),
            permissions: parse_list(hash.get("permissions")),
        }
    }

    pub fn has_any_permission(&self, codes: &[String]) -> bool {
        self.permissions.iter().any(|p| codes.contains(p))
    }
}

fn parse_list(raw: Option<&String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}

/// Whether `expire_time` lies in the past. Unparseable times count as expired.
///
/// Naive timestamps are local time; RFC 3339 timestamps carry their offset.
pub fn is_expired(expire_time: &str, now: DateTime<Utc>) -> bool {
    let expire_time = expire_time.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(expire_time, "%Y-%m-%dT%H:%M:%S%.f") {
        return now.with_timezone(&Local).naive_local() > naive;
    }
    match DateTime::parse_from_rfc3339(expire_time) {
        Ok(at) => now > at.with_timezone(&Utc),
        Err(_) => true,
    }
}

/// Validates bearer tokens against stored sessions.
pub struct SessionGate {
    store: Arc<dyn KvStore>,
    permission_codes: Vec<String>,
}

impl SessionGate {
    pub fn new(store: Arc<dyn KvStore>, permission_codes: Vec<String>) -> Self {
        Self {
            store,
            permission_codes,
        }
    }

    /// Live session for `token`, or `None` when absent or expired.
    pub async fn lookup(&self, token: &str) -> StoreResult<Option<Session>> {
        let key = keys::session(token);
        let hash = self.store.hash_all(&key).await?;
        if hash.is_empty() {
            return Ok(None);
        }

        let expired = hash
            .get("expire_time")
            .map_or(true, |at| is_expired(at, Utc::now()));
        if expired {
            debug!(user = hash.get("username").map(String::as_str).unwrap_or(""), "Session expired");
            let mut batch = WriteBatch::new();
            batch.delete([key]);
            self.store.apply(&batch).await?;
            return Ok(None);
        }

        Ok(Some(Session::from_hash(&hash)))
    }

    /// Session for `token` that holds one of the screening permissions.
    pub async fn authorize(&self, token: &str) -> Result<Session, ScreenerError> {
        let session = self
            .lookup(token)
            .await?
            .ok_or_else(|| ScreenerError::Unauthorized("会话无效或已过期".into()))?;

        if !session.has_any_permission(&self.permission_codes) {
            warn!(user = %session.username, "Session lacks screening permission");
            return Err(ScreenerError::Forbidden("没有权限".into()));
        }
        Ok(session)
    }
}

/// Bearer token of the request, if any.
fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Axum middleware rejecting requests without an authorized session.
pub async fn session_middleware(
    State(gate): State<Arc<SessionGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ScreenerError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ScreenerError::Unauthorized("未登录".into()))?
        .to_string();

    let session = gate.authorize(&token).await?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn seed_session(store: &InMemoryStore, token: &str, permissions: &str, expire_time: &str) {
        store.seed_hash(
            &keys::session(token),
            [
                ("user_id", "7"),
                ("username", "analyst"),
                ("roles", r#"["user"]"#),
                ("permissions", permissions),
                ("expire_time", expire_time),
            ],
        );
    }

    fn future() -> String {
        (Local::now() + Duration::hours(1))
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string()
    }

    #[test]
    fn test_is_expired_formats() {
        let now = Utc::now();
        assert!(is_expired("2000-01-01T00:00:00", now));
        assert!(!is_expired("2999-01-01T00:00:00.123456", now));
        assert!(!is_expired("2999-01-01T00:00:00+08:00", now));
        assert!(is_expired("2000-01-01T00:00:00Z", now));
        assert!(is_expired("not a time", now));
    }

    #[tokio::test]
    async fn test_authorize_valid_session() {
        let store = Arc::new(InMemoryStore::new());
        seed_session(&store, "tok", r#"["stock:filter"]"#, &future());

        let gate = SessionGate::new(store, vec!["stock:filter".into(), "filter".into()]);
        let session = gate.authorize("tok").await.unwrap();
        assert_eq!(session.username, "analyst");
        assert_eq!(session.roles, vec!["user"]);
    }

    #[tokio::test]
    async fn test_missing_permission_is_forbidden() {
        let store = Arc::new(InMemoryStore::new());
        seed_session(&store, "tok", r#"["admin:users"]"#, &future());

        let gate = SessionGate::new(store, vec!["stock:filter".into()]);
        let err = gate.authorize("tok").await.unwrap_err();
        assert!(matches!(err, ScreenerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted() {
        let store = Arc::new(InMemoryStore::new());
        seed_session(&store, "old", r#"["stock:filter"]"#, "2020-01-01T00:00:00");

        let gate = SessionGate::new(store.clone(), vec!["stock:filter".into()]);
        let err = gate.authorize("old").await.unwrap_err();
        assert!(matches!(err, ScreenerError::Unauthorized(_)));
        assert!(!store.exists("session:old").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let gate = SessionGate::new(Arc::new(InMemoryStore::new()), vec![]);
        assert!(gate.lookup("nope").await.unwrap().is_none());
    }
}
