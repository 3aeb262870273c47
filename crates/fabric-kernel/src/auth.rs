//! Caller authentication.
//!
//! The current revision verifies pre-shared keys only. Passport and mTLS
//! credentials are parsed into the envelope shape but not cryptographically
//! verified; that verification is the designated extension point (and the
//! reason `AUTH_EXPIRED` exists in the code table).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ErrorCode, FabricError, FabricResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Psk,
    Passport,
    Mtls,
    None,
}

/// The authenticated identity attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub mode: AuthMode,
    pub principal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_passport_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl AuthContext {
    /// Identity used by the local (stdio) front, which has no credential
    /// material: the caller shares the process.
    pub fn local() -> Self {
        Self {
            mode: AuthMode::None,
            principal_id: Some("local".to_string()),
            agent_passport_id: None,
            signature: None,
            key_id: None,
        }
    }

    fn psk() -> Self {
        Self {
            mode: AuthMode::Psk,
            principal_id: Some("psk-client".to_string()),
            agent_passport_id: None,
            signature: None,
            key_id: None,
        }
    }
}

/// Constant-time byte comparison. Both length and content differences take
/// the same time for equal-length inputs; length itself is not secret here.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verifies inbound credential material and produces an [`AuthContext`].
#[derive(Debug, Clone)]
pub struct AuthVerifier {
    psk: Option<String>,
}

impl AuthVerifier {
    pub fn new(psk: impl Into<String>) -> Self {
        Self { psk: Some(psk.into()) }
    }

    /// A verifier with no configured secret accepts every caller as
    /// anonymous. Intended for development and the local front only.
    pub fn disabled() -> Self {
        Self { psk: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.psk.is_some()
    }

    /// Verify a bearer token against the configured PSK.
    ///
    /// - missing token, or token that does not match → `AUTH_DENIED`
    /// - syntactically malformed token → `AUTH_INVALID`
    ///
    /// The comparison is constant-time and performs no I/O.
    pub fn verify_bearer(&self, token: Option<&str>) -> FabricResult<AuthContext> {
        let Some(expected) = &self.psk else {
            return Ok(AuthContext {
                mode: AuthMode::None,
                principal_id: Some("anonymous".to_string()),
                agent_passport_id: None,
                signature: None,
                key_id: None,
            });
        };

        let Some(token) = token else {
            return Err(FabricError::new(
                ErrorCode::AuthDenied,
                "No authentication token provided",
            ));
        };

        if token.is_empty() || !token.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(FabricError::new(
                ErrorCode::AuthInvalid,
                "Malformed authentication token",
            ));
        }

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("rejected request: bearer token mismatch");
            return Err(FabricError::new(
                ErrorCode::AuthDenied,
                "Invalid authentication token",
            ));
        }

        Ok(AuthContext::psk())
    }

    /// Parse a structured passport credential into an [`AuthContext`].
    ///
    /// Signature, expiry, and delegation scope are not verified in this
    /// revision; the fields are carried so downstream policy can be added
    /// without a wire change.
    pub fn parse_passport(&self, passport: &serde_json::Value) -> AuthContext {
        AuthContext {
            mode: AuthMode::Passport,
            principal_id: passport
                .get("principal_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            agent_passport_id: passport
                .get("agent_passport_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            signature: passport
                .get("signature")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            key_id: passport
                .get("key_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}
