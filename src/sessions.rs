use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Pending device-flow authorization, keyed by the upstream device code.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Pending authorization-code flow, keyed by the client's state nonce.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub state: String,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// In-memory device-flow sessions. Process-local: a restart invalidates
/// in-flight flows and clients re-initiate. The lock is held only for map
/// mutations, never across I/O.
#[derive(Default)]
pub struct DeviceSessions {
    inner: Mutex<HashMap<String, DeviceSession>>,
}

impl DeviceSessions {
    pub fn insert(&self, device_code: String, session: DeviceSession) {
        self.inner
            .lock()
            .expect("device session lock")
            .insert(device_code, session);
    }

    /// Returns the live session for a device code; expired entries are
    /// evicted on lookup.
    pub fn get(&self, device_code: &str) -> Option<DeviceSession> {
        let mut map = self.inner.lock().expect("device session lock");
        match map.get(device_code) {
            Some(s) if s.expires_at > Utc::now() => Some(s.clone()),
            Some(_) => {
                map.remove(device_code);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, device_code: &str) {
        self.inner
            .lock()
            .expect("device session lock")
            .remove(device_code);
    }
}

/// In-memory authorization-code sessions, single use: `take` removes the
/// entry whether or not it is still live.
#[derive(Default)]
pub struct AuthSessions {
    inner: Mutex<HashMap<String, AuthSession>>,
}

impl AuthSessions {
    pub fn insert(&self, session: AuthSession) {
        self.inner
            .lock()
            .expect("auth session lock")
            .insert(session.state.clone(), session);
    }

    pub fn take(&self, state: &str) -> Option<AuthSession> {
        let mut map = self.inner.lock().expect("auth session lock");
        let session = map.remove(state)?;
        if session.expires_at > Utc::now() {
            Some(session)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn device(expires_in: i64) -> DeviceSession {
        DeviceSession {
            client_id: "rocketship-cli".into(),
            scopes: vec!["openid".into()],
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }

    #[test]
    fn device_sessions_expire_on_lookup() {
        let sessions = DeviceSessions::default();
        sessions.insert("fresh".into(), device(60));
        sessions.insert("stale".into(), device(-1));
        assert!(sessions.get("fresh").is_some());
        assert!(sessions.get("stale").is_none());
        // evicted, not just hidden
        assert!(sessions.get("stale").is_none());
    }

    #[test]
    fn device_sessions_removed_after_exchange() {
        let sessions = DeviceSessions::default();
        sessions.insert("abc".into(), device(60));
        sessions.remove("abc");
        assert!(sessions.get("abc").is_none());
    }

    #[test]
    fn auth_sessions_are_single_use() {
        let sessions = AuthSessions::default();
        sessions.insert(AuthSession {
            state: "nonce".into(),
            code_challenge: "challenge".into(),
            redirect_uri: "http://localhost:5173/cb".into(),
            scopes: vec![],
            expires_at: Utc::now() + Duration::minutes(10),
        });
        assert!(sessions.take("nonce").is_some());
        assert!(sessions.take("nonce").is_none());
    }

    #[test]
    fn expired_auth_sessions_not_returned() {
        let sessions = AuthSessions::default();
        sessions.insert(AuthSession {
            state: "old".into(),
            code_challenge: "c".into(),
            redirect_uri: "http://localhost/cb".into(),
            scopes: vec![],
            expires_at: Utc::now() - Duration::seconds(1),
        });
        assert!(sessions.take("old").is_none());
    }
}
