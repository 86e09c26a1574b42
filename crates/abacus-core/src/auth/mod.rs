//! User registration, login, and bearer-token verification.
//!
//! Passwords are stored as bcrypt hashes. Session tokens are HS256 JWTs
//! carrying the login and a 24-hour expiry; verification pins the
//! algorithm so tokens signed any other way are rejected.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use abacus_db::queries::users::{self as user_db, NewUser};

/// Token lifetime.
const TOKEN_TTL_HOURS: i64 = 24;

/// Errors from the auth boundary.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("login and password must not be empty")]
    MissingCredentials,

    #[error("user {0:?} already exists")]
    UserExists(String),

    #[error("user {0:?} not found")]
    UnknownUser(String),

    #[error("invalid password")]
    WrongPassword,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("failed to process password: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("failed to sign token: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("storage failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Registration and token issuance/verification against the user store.
pub struct Authenticator {
    pool: SqlitePool,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, secret: &str) -> Self {
        Self {
            pool,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Create a new user with a hashed password.
    pub async fn register(&self, login: &str, password: &str) -> Result<(), AuthError> {
        if login.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if user_db::get_user_by_login(&self.pool, login).await?.is_some() {
            return Err(AuthError::UserExists(login.to_owned()));
        }

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        user_db::insert_user(
            &self.pool,
            &NewUser {
                id: Uuid::new_v4(),
                login,
                password_hash: &password_hash,
            },
        )
        .await?;

        tracing::info!(login, "user registered");
        Ok(())
    }

    /// Check credentials and issue a signed token.
    pub async fn login(&self, login: &str, password: &str) -> Result<String, AuthError> {
        if login.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let user = user_db::get_user_by_login(&self.pool, login)
            .await?
            .ok_or_else(|| AuthError::UnknownUser(login.to_owned()))?;

        if !bcrypt::verify(password, &user.password_hash)? {
            return Err(AuthError::WrongPassword);
        }

        let claims = Claims {
            sub: login.to_owned(),
            exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(AuthError::Signing)
    }

    /// Verify a bearer token and return the login it was issued to.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(data.claims.sub)
    }
}
