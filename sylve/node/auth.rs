use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClusterConfig;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Stable, greppable message code
    pub fn code(&self) -> &'static str {
        "authentication_failed"
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Claims of a cluster-issued credential
#[derive(Serialize, Deserialize, Debug)]
pub struct ClusterClaims {
    /// Issuing node identity
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issue a short-lived HS256 token signed with the shared cluster secret
pub fn create_cluster_jwt(config: &ClusterConfig) -> AuthResult<String> {
    let now = Utc::now();

    let claims = ClusterClaims {
        sub: config.node_id.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(config.token_ttl as i64)).timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?)
}

/// Verify a cluster token's signature and expiry
pub fn verify_cluster_jwt(config: &ClusterConfig, token: &str) -> AuthResult<ClusterClaims> {
    let data = decode::<ClusterClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::{create_cluster_jwt, verify_cluster_jwt, ClusterClaims};
    use crate::config::ClusterConfig;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            secret: String::from("test-cluster-secret"),
            node_id: String::from("node-a"),
            token_ttl: 60,
        }
    }

    #[test]
    fn test_roundtrip() {
        let config = cluster();

        let token = create_cluster_jwt(&config).unwrap();
        let claims = verify_cluster_jwt(&config, &token).unwrap();

        assert_eq!(claims.sub, "node-a");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = create_cluster_jwt(&cluster()).unwrap();

        let mut other = cluster();
        other.secret = String::from("different-secret");

        assert!(verify_cluster_jwt(&other, &token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let config = cluster();
        let now = Utc::now();

        let claims = ClusterClaims {
            sub: config.node_id.clone(),
            iat: (now - Duration::hours(3)).timestamp(),
            exp: (now - Duration::hours(2)).timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();

        assert!(verify_cluster_jwt(&config, &token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_cluster_jwt(&cluster(), "not-a-token").is_err());
    }
}
