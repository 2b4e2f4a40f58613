// utils/token.rs
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorMessage, HttpError};

// Tokens are minted by the main marketplace platform; this service only
// verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Dealership id the token acts for
    pub sub: String,
    /// "dealer" or "admin"
    pub role: String,
    pub iat: usize,
    pub exp: usize,
}

pub fn decode_token<T: Into<String>>(token: T, secret: &[u8]) -> Result<TokenClaims, HttpError> {
    let decoded = decode::<TokenClaims>(
        &token.into(),
        &DecodingKey::from_secret(secret),
        &Validation::new(jsonwebtoken::Algorithm::HS256),
    );

    match decoded {
        Ok(token) => Ok(token.claims),
        Err(_) => Err(HttpError::unauthorized(
            ErrorMessage::InvalidToken.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn mint(sub: &str, role: &str, secret: &[u8]) -> String {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: sub.to_string(),
            role: role.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::seconds(60)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn decodes_claims_minted_with_the_shared_secret() {
        let secret = b"my-test-secret";
        let claims = decode_token(mint("7f0a", "dealer", secret), secret).unwrap();
        assert_eq!(claims.sub, "7f0a");
        assert_eq!(claims.role, "dealer");
    }

    #[test]
    fn rejects_wrong_secret_and_garbage_tokens() {
        let token = mint("abc", "admin", b"secret-a");
        assert!(decode_token(token, b"secret-b").is_err());
        assert!(decode_token("not-a-jwt", b"secret-a").is_err());
    }
}
