//! Credential source for the authentication handshake
//!
//! The link never stores credentials: it asks the source at handshake time,
//! so a login or logout between connections is always picked up.

use parking_lot::RwLock;
use std::fmt;

/// Bearer token plus numeric user id
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub user_id: i64,
}

impl Credential {
    pub fn new(token: impl Into<String>, user_id: i64) -> Self {
        Self {
            token: token.into(),
            user_id,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Supplies the current credential, or `None` when not authenticated.
pub trait CredentialSource: Send + Sync {
    fn credential(&self) -> Option<Credential>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<Credential> + Send + Sync,
{
    fn credential(&self) -> Option<Credential> {
        self()
    }
}

/// Mutable credential slot updated by the session layer on login/logout
#[derive(Default)]
pub struct SessionCredentials {
    current: RwLock<Option<Credential>>,
}

impl SessionCredentials {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            current: RwLock::new(credential),
        }
    }

    pub fn set(&self, credential: Credential) {
        *self.current.write() = Some(credential);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl CredentialSource for SessionCredentials {
    fn credential(&self) -> Option<Credential> {
        self.current.read().clone()
    }
}
