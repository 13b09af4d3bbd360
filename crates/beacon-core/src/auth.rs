//! Connection authentication.
//!
//! [`AuthGate`] turns the credential presented at connection time into an
//! [`Identity`]. In [`AuthMode::Jwt`] a missing or invalid token refuses the
//! connection; in [`AuthMode::Open`] (local development only) every
//! connection becomes an anonymous citizen.

use std::time::Duration;

use beacon_types::{Identity, ResponderId, Role, UserId};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::{AuthConfig, AuthMode};
use crate::error::BrokerError;

/// Claims carried by a broker token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id (dashboard tokens).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// User id (standard subject claim).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Role of the holder.
    pub role: Role,
    /// Responder unit, for RESPONDER tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_id: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// Places a client may put its token, checked in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSources {
    /// `token` query parameter of the upgrade request.
    pub query: Option<String>,
    /// `Authorization` header value.
    pub authorization: Option<String>,
    /// `Sec-WebSocket-Protocol` header value.
    pub protocol: Option<String>,
}

impl CredentialSources {
    /// The first token found.
    ///
    /// The protocol header form is `bearer, <token>`, the convention browsers
    /// use since they cannot set `Authorization` on a WebSocket upgrade.
    pub fn token(&self) -> Option<&str> {
        let from_query = self.query.as_deref().filter(|t| !t.is_empty());
        let from_header = self
            .authorization
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let from_protocol = self.protocol.as_deref().and_then(|h| {
            let mut parts = h.split(',').map(str::trim);
            match (parts.next(), parts.next()) {
                (Some(scheme), Some(token))
                    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() =>
                {
                    Some(token)
                }
                _ => None,
            }
        });
        from_query.or(from_header).or(from_protocol)
    }
}

/// Validates credentials and mints tokens.
pub struct AuthGate {
    mode: AuthMode,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
    guest_ttl: Duration,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("mode", &self.mode)
            .field("token_ttl", &self.token_ttl)
            .field("guest_ttl", &self.guest_ttl)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Build a gate from configuration.
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            mode: config.mode,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            token_ttl: Duration::from_secs(config.token_ttl_secs),
            guest_ttl: Duration::from_secs(config.guest_token_ttl_secs),
        }
    }

    /// The configured mode.
    pub const fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Resolve the identity behind a connection attempt.
    pub fn authenticate(&self, credentials: &CredentialSources) -> Result<Identity, BrokerError> {
        if self.mode == AuthMode::Open {
            let id = format!("dev_user_{}", uuid::Uuid::now_v7().simple());
            tracing::debug!(user_id = %id, "open auth mode, synthesizing citizen identity");
            return Ok(Identity {
                id: UserId::new(id),
                display_name: "Development User".to_owned(),
                role: Role::Citizen,
                responder_id: None,
            });
        }

        let Some(token) = credentials.token() else {
            tracing::warn!(target: "security", "connection attempt without token");
            return Err(BrokerError::Authentication("token required".to_owned()));
        };
        self.verify(token)
    }

    /// Verify a token and derive the identity it carries.
    pub fn verify(&self, token: &str) -> Result<Identity, BrokerError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::warn!(target: "security", error = %e, "token verification failed");
            BrokerError::Authentication(e.to_string())
        })?;
        identity_from_claims(data.claims)
    }

    /// Mint a token for `identity` with the standard lifetime.
    pub fn issue(&self, identity: &Identity) -> Result<String, BrokerError> {
        self.issue_for(identity, self.token_ttl)
    }

    /// Mint a short-lived token for an anonymous citizen.
    pub fn issue_guest(&self) -> Result<(Identity, String), BrokerError> {
        let identity = Identity {
            id: UserId::new(format!("guest_{}", uuid::Uuid::now_v7().simple())),
            display_name: "Guest".to_owned(),
            role: Role::Citizen,
            responder_id: None,
        };
        let token = self.issue_for(&identity, self.guest_ttl)?;
        Ok((identity, token))
    }

    fn issue_for(&self, identity: &Identity, ttl: Duration) -> Result<String, BrokerError> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            id: Some(identity.id.to_string()),
            sub: None,
            username: Some(identity.display_name.clone()),
            role: identity.role,
            responder_id: identity.responder_id.as_ref().map(ToString::to_string),
            exp: Utc::now().timestamp().saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| BrokerError::Internal(format!("token signing failed: {e}")))
    }
}

fn identity_from_claims(claims: Claims) -> Result<Identity, BrokerError> {
    let Some(id) = claims.id.or(claims.sub).filter(|id| !id.is_empty()) else {
        return Err(BrokerError::Authentication("token has no subject".to_owned()));
    };
    let responder_id = (claims.role == Role::Responder)
        .then(|| ResponderId::new(claims.responder_id.unwrap_or_else(|| id.clone())));
    Ok(Identity {
        display_name: claims.username.unwrap_or_else(|| id.clone()),
        id: UserId::new(id),
        role: claims.role,
        responder_id,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new(&AuthConfig::default())
    }

    fn operator() -> Identity {
        Identity {
            id: UserId::from("op-1"),
            display_name: "Priya".to_owned(),
            role: Role::Operator,
            responder_id: None,
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let gate = gate();
        let token = gate.issue(&operator()).unwrap();
        let sources = CredentialSources {
            authorization: Some(format!("Bearer {token}")),
            ..CredentialSources::default()
        };
        assert_eq!(gate.authenticate(&sources).unwrap(), operator());
    }

    #[test]
    fn missing_token_is_refused() {
        let err = gate().authenticate(&CredentialSources::default()).unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_ERROR");
    }

    #[test]
    fn token_signed_with_other_secret_is_refused() {
        let other = AuthGate::new(&AuthConfig {
            jwt_secret: "another-secret".to_owned(),
            ..AuthConfig::default()
        });
        let token = other.issue(&operator()).unwrap();
        assert!(gate().verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_refused() {
        let gate = gate();
        let claims = Claims {
            id: Some("u1".to_owned()),
            sub: None,
            username: None,
            role: Role::Admin,
            responder_id: None,
            exp: Utc::now().timestamp().saturating_sub(10),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &gate.encoding).unwrap();
        assert!(gate.verify(&token).is_err());
    }

    #[test]
    fn responder_without_unit_uses_user_id() {
        let gate = gate();
        let identity = Identity {
            id: UserId::from("r-9"),
            display_name: "Unit 9".to_owned(),
            role: Role::Responder,
            responder_id: None,
        };
        let token = gate.issue(&identity).unwrap();
        let verified = gate.verify(&token).unwrap();
        assert_eq!(verified.responder_id, Some(ResponderId::from("r-9")));
    }

    #[test]
    fn credential_sources_checked_in_order() {
        let sources = CredentialSources {
            query: Some("from-query".to_owned()),
            authorization: Some("Bearer from-header".to_owned()),
            protocol: Some("bearer, from-protocol".to_owned()),
        };
        assert_eq!(sources.token(), Some("from-query"));

        let sources = CredentialSources {
            protocol: Some("bearer, from-protocol".to_owned()),
            ..CredentialSources::default()
        };
        assert_eq!(sources.token(), Some("from-protocol"));

        let sources = CredentialSources {
            authorization: Some("Basic abc".to_owned()),
            ..CredentialSources::default()
        };
        assert_eq!(sources.token(), None);
    }

    #[test]
    fn open_mode_synthesizes_citizen() {
        let gate = AuthGate::new(&AuthConfig {
            mode: AuthMode::Open,
            ..AuthConfig::default()
        });
        let identity = gate.authenticate(&CredentialSources::default()).unwrap();
        assert_eq!(identity.role, Role::Citizen);
        assert!(identity.id.as_str().starts_with("dev_user_"));
    }

    #[test]
    fn guest_tokens_verify_as_citizens() {
        let gate = gate();
        let (identity, token) = gate.issue_guest().unwrap();
        assert_eq!(gate.verify(&token).unwrap(), identity);
    }
}
