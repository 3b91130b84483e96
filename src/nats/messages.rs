//! Messages published on NATS subjects

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Plaintext passcode handed to the notification service.
///
/// This is the only place the plaintext code ever leaves the issuer.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct OtpNotice {
    pub token: String,
    pub email: String,
    pub code: String,
}

impl fmt::Debug for OtpNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpNotice")
            .field("token", &self.token)
            .field("email", &self.email)
            .field("code", &"<redacted>")
            .finish()
    }
}

/// Published once a session reaches its terminal signed state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedArtifactEvent {
    pub token: String,
    pub signed_blob_key: String,
    pub signed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_notice_debug_hides_code() {
        let notice = OtpNotice {
            token: "t1".into(),
            email: "a@b.com".into(),
            code: "482913".into(),
        };
        let debug = format!("{:?}", notice);
        assert!(debug.contains("t1"));
        assert!(!debug.contains("482913"));

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["code"], "482913");
    }

    #[test]
    fn test_signed_event_wire_format() {
        let event = SignedArtifactEvent {
            token: "t1".into(),
            signed_blob_key: "signed/doc.pdf".into(),
            signed_at: "2026-01-02T03:04:05Z".parse().unwrap(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"token":"t1","signed_blob_key":"signed/doc.pdf","signed_at":"2026-01-02T03:04:05Z"}"#
        );
    }
}
