use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;
use crate::notification::RecipientId;

use super::{Claims, IdentityProvider};

/// HS256 shared-secret validator
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();
        // Configured issuer/audience claims are mandatory
        let mut required = vec!["exp"];

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
            required.push("aud");
        }

        validation.set_required_spec_claims(&required[..]);

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

impl IdentityProvider for JwtValidator {
    fn authenticate(&self, token: &str) -> Result<RecipientId, AppError> {
        let claims = self.validate(token)?;
        if claims.sub.is_empty() {
            return Err(AppError::Auth("Token has no subject".to_string()));
        }
        Ok(claims.recipient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
            issuer: None,
            audience: None,
        }
    }

    fn claims_for(sub: &str, exp_offset: i64) -> Claims {
        let now = chrono::Utc::now().timestamp();
        Claims {
            sub: sub.to_string(),
            exp: now + exp_offset,
            iat: now,
            extra: Default::default(),
        }
    }

    fn create_test_token(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_yields_recipient() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&claims_for("account-123", 3600), &config.secret);
        let recipient = validator.authenticate(&token).unwrap();

        assert_eq!(recipient, RecipientId::new("account-123"));
    }

    #[test]
    fn test_invalid_token() {
        let validator = JwtValidator::new(&create_test_config());
        assert!(matches!(
            validator.authenticate("invalid-token"),
            Err(AppError::Auth(_))
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let validator = JwtValidator::new(&create_test_config());
        let token = create_test_token(&claims_for("account-123", 3600), "another-secret");
        assert!(validator.authenticate(&token).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let validator = JwtValidator::new(&create_test_config());
        let claims = claims_for("account-123", -3600);
        assert!(claims.is_expired());

        let token = create_test_token(&claims, &create_test_config().secret);
        assert!(validator.authenticate(&token).is_err());
    }

    #[test]
    fn test_issuer_is_enforced() {
        let config = JwtConfig {
            issuer: Some("status-api".to_string()),
            ..create_test_config()
        };
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&claims_for("account-123", 3600), &config.secret);
        assert!(validator.authenticate(&token).is_err());
    }

    fn with_claim(mut claims: Claims, name: &str, value: &str) -> Claims {
        claims
            .extra
            .insert(name.to_string(), serde_json::Value::String(value.to_string()));
        claims
    }

    #[test]
    fn test_matching_issuer_is_accepted() {
        let config = JwtConfig {
            issuer: Some("status-api".to_string()),
            ..create_test_config()
        };
        let validator = JwtValidator::new(&config);

        let claims = with_claim(claims_for("account-123", 3600), "iss", "status-api");
        let token = create_test_token(&claims, &config.secret);
        assert_eq!(
            validator.authenticate(&token).unwrap(),
            RecipientId::new("account-123")
        );

        let claims = with_claim(claims_for("account-123", 3600), "iss", "someone-else");
        let token = create_test_token(&claims, &config.secret);
        assert!(validator.authenticate(&token).is_err());
    }

    #[test]
    fn test_audience_is_enforced() {
        let config = JwtConfig {
            audience: Some("status-clients".to_string()),
            ..create_test_config()
        };
        let validator = JwtValidator::new(&config);

        let token = create_test_token(&claims_for("account-123", 3600), &config.secret);
        assert!(validator.authenticate(&token).is_err());

        let claims = with_claim(claims_for("account-123", 3600), "aud", "status-clients");
        let token = create_test_token(&claims, &config.secret);
        assert!(validator.authenticate(&token).is_ok());
    }

    #[test]
    fn test_empty_subject_is_rejected() {
        let config = create_test_config();
        let validator = JwtValidator::new(&config);
        let token = create_test_token(&claims_for("", 3600), &config.secret);
        assert!(validator.authenticate(&token).is_err());
    }
}
