use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::authz::Role;
use crate::config::{ConfigError, SecurityConfig, MIN_SECRET_BYTES};
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<Role>,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Request context carried by this token
    pub fn context(&self) -> TenantContext {
        TenantContext::new(self.tenant_id, self.sub, self.roles.iter().copied())
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT generation error: {0}")]
    Generation(String),

    #[error("Invalid JWT token: {0}")]
    Invalid(String),

    #[error("Expected a {expected:?} token, got {actual:?}")]
    WrongKind { expected: TokenKind, actual: TokenKind },
}

/// Issues and validates HS256 tokens. Construction enforces key strength
/// and positive lifetimes, so a running service never holds a weak config.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Result<Self, ConfigError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret(secret.len()));
        }
        if access_ttl_secs <= 0 {
            return Err(ConfigError::NonPositive("JWT_ACCESS_TOKEN_EXPIRY"));
        }
        if refresh_ttl_secs <= 0 {
            return Err(ConfigError::NonPositive("JWT_REFRESH_TOKEN_EXPIRY"));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, ConfigError> {
        Self::new(
            &config.jwt_secret,
            config.access_token_expiry_secs,
            config.refresh_token_expiry_secs,
        )
    }

    pub fn issue_access(&self, ctx: &TenantContext) -> Result<String, TokenError> {
        self.issue(ctx, TokenKind::Access, self.access_ttl)
    }

    pub fn issue_refresh(&self, ctx: &TenantContext) -> Result<String, TokenError> {
        self.issue(ctx, TokenKind::Refresh, self.refresh_ttl)
    }

    fn issue(&self, ctx: &TenantContext, kind: TokenKind, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: ctx.user_id,
            tenant_id: ctx.tenant_id,
            roles: ctx.roles.iter().copied().collect(),
            token_type: kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Generation(e.to_string()))
    }

    /// Check signature, expiry, and that the token is of `expected` kind
    pub fn validate(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?
            .claims;

        if claims.token_type != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.token_type,
            });
        }
        Ok(claims)
    }
}
