use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Identity asserted by a verified bearer token. `sub` is the user id the
/// portal scopes every operation to.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Claims>;
}

pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256Verifier {
    pub fn new(secret: String) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Reject tokens whose `exp` has passed.
    pub fn require_expiry(mut self) -> Self {
        self.validation.validate_exp = true;
        self.validation.required_spec_claims.insert("exp".to_string());
        self
    }
}

#[async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .ok()
            .map(|d| d.claims)
            .filter(|c| !c.sub.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Mint<'a> {
        sub: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        exp: Option<u64>,
    }

    fn token(secret: &str, claims: &Mint) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn verifies_signed_tokens() {
        let verifier = Hs256Verifier::new("s3cret".into());
        let t = token(
            "s3cret",
            &Mint {
                sub: "u1",
                email: Some("u1@example.com"),
                exp: None,
            },
        );
        let claims = verifier.verify(&t).await.unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("u1@example.com"));

        let forged = token(
            "other",
            &Mint {
                sub: "u1",
                email: None,
                exp: None,
            },
        );
        assert!(verifier.verify(&forged).await.is_none());
    }

    #[tokio::test]
    async fn expiry_is_enforced_when_required() {
        let verifier = Hs256Verifier::new("s3cret".into()).require_expiry();
        let stale = token(
            "s3cret",
            &Mint {
                sub: "u1",
                email: None,
                exp: Some(1_000),
            },
        );
        let missing = token(
            "s3cret",
            &Mint {
                sub: "u1",
                email: None,
                exp: None,
            },
        );
        assert!(verifier.verify(&stale).await.is_none());
        assert!(verifier.verify(&missing).await.is_none());
    }
}
