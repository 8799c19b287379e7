use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::user::Role;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("access token signing failed: {0}")]
    Sign(String),
}

/// Argon2id with the crate's default cost, stored in PHC string form.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| CredentialError::Hash(error.to_string()))
}

/// Cost parameters come from the stored hash, so older hashes keep verifying.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub roles: Vec<Role>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Issues and checks HS256 access tokens.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, access_ttl: Duration) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue(
        &self,
        user_id: &str,
        roles: &[Role],
        now: DateTime<Utc>,
    ) -> Result<String, CredentialError> {
        let claims = AccessClaims {
            sub: user_id.to_string(),
            roles: roles.to_vec(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| CredentialError::Sign(error.to_string()))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding, &validation()).map_err(|error| {
            match error.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            }
        })?;
        if data.claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }
}

/// Expiry is compared against the caller's clock in [`TokenSigner::verify`].
fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp", "sub"]);
    validation
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").field("access_ttl", &self.access_ttl).finish_non_exhaustive()
    }
}

/// Opaque refresh token handed to the client; only its digest is stored.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use jsonwebtoken::{decode_header, Algorithm};

    use super::{
        generate_refresh_token, hash_password, token_digest, verify_password, TokenError,
        TokenSigner,
    };
    use crate::domain::user::Role;

    /// Argon2id hash of `Koperasi123!` as shipped in the demo fixture.
    const FIXTURE_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$a29wZXJhc2ktc2VlZDAwMQ$vX5sh5kGy3G5pDwFynR3H2k/k8VMsdLZDGcoU0hJz1w";

    #[test]
    fn password_hash_verifies_only_the_original_password() {
        let stored = hash_password("rahasia-koperasi").expect("hash");
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_password("rahasia-koperasi", &stored));
        assert!(!verify_password("rahasia-koperasi!", &stored));
    }

    #[test]
    fn salts_make_hashes_unique() {
        let first = hash_password("same").expect("hash");
        let second = hash_password("same").expect("hash");
        assert_ne!(first, second);
        assert!(verify_password("same", &first) && verify_password("same", &second));
    }

    #[test]
    fn fixture_hash_verifies_the_demo_password() {
        assert!(verify_password("Koperasi123!", FIXTURE_HASH));
        assert!(!verify_password("koperasi123!", FIXTURE_HASH));
    }

    #[test]
    fn malformed_or_foreign_stored_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "md5$1$00$00"));
        assert!(!verify_password(
            "x",
            "pbkdf2-sha256$20000$6b6f7065726173692d73656564303031$be614ffc03d57d67"
        ));
    }

    #[test]
    fn access_token_is_an_hs256_jwt_and_expires() {
        let signer = TokenSigner::new("secret-key-for-tests", Duration::minutes(15));
        let issued_at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("time");
        let token = signer.issue("u-1", &[Role::Ketua], issued_at).expect("issue");

        assert_eq!(token.split('.').count(), 3);
        assert_eq!(decode_header(&token).expect("header").alg, Algorithm::HS256);

        let claims = signer.verify(&token, issued_at + Duration::minutes(5)).expect("valid");
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.roles, vec![Role::Ketua]);
        assert_eq!(claims.exp - claims.iat, 15 * 60);

        assert_eq!(
            signer.verify(&token, issued_at + Duration::minutes(16)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let signer = TokenSigner::new("secret-key-for-tests", Duration::minutes(15));
        let now = Utc::now();
        let token = signer.issue("u-1", &[Role::Employee], now).expect("issue");

        let other = TokenSigner::new("another-secret-key", Duration::minutes(15));
        assert_eq!(other.verify(&token, now), Err(TokenError::BadSignature));
        assert_eq!(signer.verify("garbage", now), Err(TokenError::Malformed));

        let elevated = signer.issue("u-1", &[Role::SuperAdmin], now).expect("issue");
        let signature = token.rsplit('.').next().expect("signature");
        let (signed_part, _) = elevated.rsplit_once('.').expect("three parts");
        let forged = format!("{signed_part}.{signature}");
        assert_eq!(signer.verify(&forged, now), Err(TokenError::BadSignature));
    }

    #[test]
    fn refresh_tokens_are_random_and_digest_is_stable() {
        let first = generate_refresh_token();
        let second = generate_refresh_token();
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(token_digest(&first), token_digest(&first));
        assert_ne!(token_digest(&first), first);
    }

    #[test]
    fn debug_output_hides_secret() {
        let signer = TokenSigner::new("do-not-print", Duration::minutes(1));
        assert!(!format!("{signer:?}").contains("do-not-print"));
    }
}
