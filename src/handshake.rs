//! Authentication handshake
//!
//! Sent once per freshly opened transport. The server's answer (if any)
//! arrives as an ordinary event, so nothing is awaited here.

use crate::core::OutboundFrame;
use crate::credentials::CredentialSource;
use tracing::debug;

/// Build the auth frame from the credential available right now.
///
/// Returns None when the session is not authenticated; the connection then
/// stays open without an identity binding.
pub fn auth_frame(source: &dyn CredentialSource) -> Option<OutboundFrame> {
    match source.credential() {
        Some(credential) => {
            debug!(user_id = credential.user_id, "Sending auth handshake");
            Some(OutboundFrame::Auth {
                token: credential.token,
                user_id: credential.user_id,
            })
        }
        None => {
            debug!("No credential available, skipping auth handshake");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, SessionCredentials};

    #[test]
    fn test_frame_uses_current_credential() {
        let session = SessionCredentials::new(Some(Credential::new("first", 1)));
        assert_eq!(
            auth_frame(&session),
            Some(OutboundFrame::Auth {
                token: "first".into(),
                user_id: 1
            })
        );

        // Re-login between connections is picked up
        session.set(Credential::new("second", 2));
        assert_eq!(
            auth_frame(&session),
            Some(OutboundFrame::Auth {
                token: "second".into(),
                user_id: 2
            })
        );
    }

    #[test]
    fn test_no_credential_skips() {
        let session = SessionCredentials::default();
        assert_eq!(auth_frame(&session), None);
    }
}
