//! Capability Tokens
//!
//! Attach a round, or a specific batch leaf, to an application transaction
//! so a counterparty can later ask for the matching reveal or inclusion
//! proof. Tokens are HS256 JWTs signed with a key shared by the two sides.

use std::time::{SystemTime, UNIX_EPOCH};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::ids::{BatchId, PartyId, RoundId};

/// What a token grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum CapabilityScope {
    /// The reveals of a round.
    Round {
        /// Round identifier.
        round_id: RoundId,
    },
    /// One leaf of a batch.
    Leaf {
        /// Batch identifier.
        batch_id: BatchId,
        /// Leaf index.
        index: usize,
    },
}

/// JWT claims of a capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Holder (UUID string).
    pub sub: String,
    /// Issuer (UUID string).
    pub iss: String,
    /// Expiry timestamp (Unix seconds).
    pub exp: u64,
    /// Issued at timestamp.
    pub iat: u64,
    /// Granted scope.
    pub grant: CapabilityScope,
}

impl CapabilityClaims {
    /// Holder as a party id.
    pub fn holder(&self) -> Result<PartyId, CapabilityError> {
        PartyId::from_uuid_str(&self.sub).ok_or_else(|| CapabilityError::MissingClaim("sub".into()))
    }

    /// Issuer as a party id.
    pub fn issuer(&self) -> Result<PartyId, CapabilityError> {
        PartyId::from_uuid_str(&self.iss).ok_or_else(|| CapabilityError::MissingClaim("iss".into()))
    }
}

/// Capability token errors.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Token was issued by someone else.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Required claim is missing or malformed.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Any other JWT failure.
    #[error("token error: {0}")]
    Jwt(String),
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issue a token granting `holder` access to `grant`.
pub fn issue_token(
    issuer: PartyId,
    holder: PartyId,
    grant: CapabilityScope,
    ttl_secs: u64,
    key: &[u8],
) -> Result<String, CapabilityError> {
    let iat = now_secs();
    let claims = CapabilityClaims {
        sub: holder.to_uuid_string(),
        iss: issuer.to_uuid_string(),
        exp: iat.saturating_add(ttl_secs),
        iat,
        grant,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(key))
        .map_err(map_jwt_error)
}

/// Validate a token issued by `expected_issuer`.
pub fn validate_token(
    token: &str,
    expected_issuer: &PartyId,
    key: &[u8],
) -> Result<CapabilityClaims, CapabilityError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[expected_issuer.to_uuid_string()]);
    validation.validate_aud = false;

    let data = decode::<CapabilityClaims>(token, &DecodingKey::from_secret(key), &validation)
        .map_err(map_jwt_error)?;
    let claims = data.claims;

    claims.holder()?;
    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CapabilityError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => CapabilityError::Expired,
        ErrorKind::InvalidSignature => CapabilityError::InvalidSignature,
        ErrorKind::InvalidIssuer => CapabilityError::InvalidIssuer,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => CapabilityError::InvalidFormat,
        _ => CapabilityError::Jwt(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"shared-capability-key-for-tests!";
    const ISSUER: PartyId = PartyId::new([0xa; 16]);
    const HOLDER: PartyId = PartyId::new([0xb; 16]);

    fn leaf_scope() -> CapabilityScope {
        CapabilityScope::Leaf { batch_id: BatchId::new([3; 16]), index: 17 }
    }

    #[test]
    fn test_issue_and_validate() {
        let token = issue_token(ISSUER, HOLDER, leaf_scope(), 3600, KEY).unwrap();
        let claims = validate_token(&token, &ISSUER, KEY).unwrap();

        assert_eq!(claims.grant, leaf_scope());
        assert_eq!(claims.holder().unwrap(), HOLDER);
        assert_eq!(claims.issuer().unwrap(), ISSUER);
    }

    #[test]
    fn test_unbounded_ttl_saturates() {
        let token = issue_token(ISSUER, HOLDER, leaf_scope(), u64::MAX, KEY).unwrap();
        let claims = validate_token(&token, &ISSUER, KEY).unwrap();
        assert_eq!(claims.exp, u64::MAX);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = issue_token(ISSUER, HOLDER, leaf_scope(), 3600, KEY).unwrap();
        let result = validate_token(&token, &ISSUER, b"some-other-key-entirely-wrong!!!");
        assert!(matches!(result, Err(CapabilityError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let token = issue_token(ISSUER, HOLDER, leaf_scope(), 3600, KEY).unwrap();
        let result = validate_token(&token, &HOLDER, KEY);
        assert!(matches!(result, Err(CapabilityError::InvalidIssuer)));
    }

    #[test]
    fn test_expired_rejected() {
        let claims = CapabilityClaims {
            sub: HOLDER.to_uuid_string(),
            iss: ISSUER.to_uuid_string(),
            exp: 1, // Expired in 1970
            iat: 0,
            grant: CapabilityScope::Round { round_id: RoundId::new([1; 16]) },
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(KEY)).unwrap();
        assert!(matches!(validate_token(&token, &ISSUER, KEY), Err(CapabilityError::Expired)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validate_token("not.a.jwt", &ISSUER, KEY).is_err());
    }
}
