//! Ed25519 access tokens.
//!
//! Tokens are issued by the identity service; this crate only needs the key pair to verify
//! them and, in tests and tooling, to mint them.

use base64::Engine;
use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    pub dealership_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub dealership_id: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("JWT_PRIVATE_KEY must be set")]
    Missing,
    #[error("JWT_PRIVATE_KEY must be valid base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("JWT_PRIVATE_KEY must be a valid Ed25519 key")]
    InvalidKey,
}

#[derive(Clone)]
pub struct JwtConfig {
    key_pair: Arc<Ed25519KeyPair>,
    public_key: Arc<Ed25519PublicKey>,
    pub access_token_expiry: i64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl JwtConfig {
    /// Reads the base64 Ed25519 key from `JWT_PRIVATE_KEY`.
    pub fn from_env(settings: &config::JwtConfig) -> Result<Self, KeyError> {
        let private_key_b64 = std::env::var("JWT_PRIVATE_KEY").map_err(|_| KeyError::Missing)?;
        let key_bytes = base64::engine::general_purpose::STANDARD.decode(private_key_b64.trim())?;
        let key_pair = Ed25519KeyPair::from_bytes(&key_bytes).map_err(|_| KeyError::InvalidKey)?;

        Ok(Self {
            access_token_expiry: settings.access_token_expiry_secs,
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            ..Self::from_key_pair(key_pair)
        })
    }

    pub fn from_key_pair(key_pair: Ed25519KeyPair) -> Self {
        let public_key = key_pair.public_key();
        Self {
            key_pair: Arc::new(key_pair),
            public_key: Arc::new(public_key),
            access_token_expiry: 3600,
            issuer: None,
            audience: None,
        }
    }

    pub fn generate_key_pair() -> (String, String) {
        let key_pair = Ed25519KeyPair::generate();
        let private_b64 = base64::engine::general_purpose::STANDARD.encode(key_pair.to_bytes());
        let public_b64 =
            base64::engine::general_purpose::STANDARD.encode(key_pair.public_key().to_bytes());
        (private_b64, public_b64)
    }

    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        dealership_id: Option<Uuid>,
    ) -> Result<String, jwt_simple::Error> {
        let custom_claims = AccessClaims {
            email: email.to_string(),
            dealership_id: dealership_id.map(|id| id.to_string()),
        };

        let mut claims = jwt_simple::claims::Claims::with_custom_claims(
            custom_claims,
            Duration::from_secs(self.access_token_expiry as u64),
        )
        .with_subject(user_id.to_string());

        if let Some(issuer) = &self.issuer {
            claims = claims.with_issuer(issuer);
        }
        if let Some(audience) = &self.audience {
            claims = claims.with_audience(audience);
        }

        self.key_pair.sign(claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, jwt_simple::Error> {
        let mut options = VerificationOptions::default();
        if let Some(issuer) = &self.issuer {
            options.allowed_issuers = Some(HashSet::from([issuer.clone()]));
        }
        if let Some(audience) = &self.audience {
            options.allowed_audiences = Some(HashSet::from([audience.clone()]));
        }

        let token_data = self
            .public_key
            .verify_token::<AccessClaims>(token, Some(options))?;

        Ok(Claims {
            sub: token_data.subject.unwrap_or_default(),
            email: token_data.custom.email,
            dealership_id: token_data.custom.dealership_id,
            exp: token_data
                .expires_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
            iat: token_data
                .issued_at
                .map(|t| t.as_secs() as i64)
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig::from_key_pair(Ed25519KeyPair::generate())
    }

    #[test]
    fn test_generate_and_verify_access_token() {
        let config = test_config();
        let user_id = Uuid::new_v4();

        let token = config
            .generate_access_token(user_id, "porter@example.com", None)
            .expect("Token generation should succeed");
        let claims = config
            .verify_access_token(&token)
            .expect("Token verification should succeed");

        assert_eq!(claims.user_id(), Some(user_id));
        assert_eq!(claims.email, "porter@example.com");
        assert!(claims.dealership_id.is_none());
    }

    #[test]
    fn test_token_carries_dealership_context() {
        let config = test_config();
        let dealership_id = Uuid::new_v4();

        let token = config
            .generate_access_token(Uuid::new_v4(), "sales@example.com", Some(dealership_id))
            .unwrap();
        let claims = config.verify_access_token(&token).unwrap();

        assert_eq!(claims.dealership_id, Some(dealership_id.to_string()));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let token = test_config()
            .generate_access_token(Uuid::new_v4(), "a@example.com", None)
            .unwrap();
        assert!(test_config().verify_access_token(&token).is_err());
        assert!(test_config().verify_access_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_issuer_is_enforced() {
        let mut issuing = test_config();
        issuing.issuer = Some("other-issuer".to_string());
        let token = issuing
            .generate_access_token(Uuid::new_v4(), "a@example.com", None)
            .unwrap();

        let mut verifying = issuing.clone();
        verifying.issuer = Some("dealergate".to_string());
        assert!(verifying.verify_access_token(&token).is_err());
    }

    #[test]
    fn test_generated_key_round_trips() {
        let (private_b64, public_b64) = JwtConfig::generate_key_pair();
        assert!(!public_b64.is_empty());

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&private_b64)
            .unwrap();
        let config = JwtConfig::from_key_pair(Ed25519KeyPair::from_bytes(&key_bytes).unwrap());

        let token = config
            .generate_access_token(Uuid::new_v4(), "a@example.com", None)
            .unwrap();
        assert!(config.verify_access_token(&token).is_ok());
    }
}
