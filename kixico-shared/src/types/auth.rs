use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_audience_role() -> String {
    "authenticated".to_string()
}

/// Access token claims issued by the auth backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Database role of the session, not the application role.
    #[serde(default = "default_audience_role")]
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, email: Option<String>, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            email,
            role: default_audience_role(),
            iat: now,
            exp: now + duration_secs,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// The signed-in caller, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_expiry() {
        let fresh = Claims::new(Uuid::new_v4(), None, 3600);
        assert!(!fresh.is_expired());

        let stale = Claims::new(Uuid::new_v4(), None, -10);
        assert!(stale.is_expired());
    }

    #[test]
    fn role_claim_defaults_when_missing() {
        let json = serde_json::json!({
            "sub": Uuid::nil(),
            "iat": 0,
            "exp": 10,
        });
        let claims: Claims = serde_json::from_value(json).unwrap();
        assert_eq!(claims.role, "authenticated");
        assert!(claims.email.is_none());
    }
}
