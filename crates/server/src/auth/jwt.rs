use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Identity, Role};

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

/// Claims issued by the identity provider. Only `exp` is mandatory; the
/// subject may arrive as `sub` or `id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Strings or `{ "name": ... }` objects.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub roles: Value,
    #[serde(default, rename = "isAdmin")]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Sign `claims` as-is.
    pub fn issue(&self, claims: &AccessClaims) -> anyhow::Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    /// Short-lived token for `subject` carrying a single role name.
    pub fn issue_for(&self, subject: &str, role: Role) -> anyhow::Result<String> {
        let issued_at = current_unix_timestamp()?;
        self.issue(&AccessClaims {
            sub: Some(subject.to_string()),
            name: Some(subject.to_string()),
            roles: Value::Array(vec![Value::String(role.as_str().to_string())]),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
            ..AccessClaims::default()
        })
    }

    pub fn validate(&self, token: &str) -> anyhow::Result<Identity> {
        let claims = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        let id = claims
            .sub
            .as_deref()
            .or(claims.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("access token carries neither sub nor id"))?
            .to_string();

        Ok(Identity { id, name: claims.name.clone(), role: resolve_role(&claims) })
    }
}

/// `isAdmin` wins; then `admin`, then `editor` among the role names; a
/// token with no roles from the built-in organization is an admin; anyone
/// else is a viewer.
pub fn resolve_role(claims: &AccessClaims) -> Role {
    if claims.is_admin {
        return Role::Admin;
    }

    let names = role_names(&claims.roles);
    if names.iter().any(|name| name == "admin") {
        Role::Admin
    } else if names.iter().any(|name| name == "editor") {
        Role::Editor
    } else if names.is_empty() && claims.owner.as_deref() == Some("built-in") {
        Role::Admin
    } else {
        Role::Viewer
    }
}

fn role_names(roles: &Value) -> Vec<String> {
    let Value::Array(items) = roles else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name.to_lowercase()),
            Value::Object(role) => {
                Some(role.get("name").and_then(Value::as_str).unwrap_or_default().to_lowercase())
            }
            _ => None,
        })
        .collect()
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_SECRET: &str = "inkwell_test_secret_that_is_definitely_long_enough";

    fn claims_with(roles: Value) -> AccessClaims {
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        AccessClaims {
            sub: Some("user-1".into()),
            roles,
            iat: now,
            exp: now + ACCESS_TOKEN_TTL_SECONDS,
            ..AccessClaims::default()
        }
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(TokenService::new("short").is_err());
    }

    #[test]
    fn issues_and_validates_tokens() {
        let service = TokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_for("alice", Role::Editor).expect("token should be issued");
        let identity = service.validate(&token).expect("token should validate");

        assert_eq!(identity.id, "alice");
        assert_eq!(identity.name.as_deref(), Some("alice"));
        assert_eq!(identity.role, Role::Editor);
    }

    #[test]
    fn rejects_tampered_and_foreign_tokens() {
        let service = TokenService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_for("alice", Role::Editor).expect("token should be issued");
        assert!(service.validate(&format!("{token}x")).is_err());

        let other = TokenService::new("another_secret_that_is_also_long_enough!!")
            .expect("service should initialize");
        assert!(other.validate(&token).is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = TokenService::new(TEST_SECRET).expect("service should initialize");
        let mut claims = claims_with(json!(["editor"]));
        claims.exp = claims.iat - 1;
        let token = service.issue(&claims).expect("token should be issued");

        assert!(service.validate(&token).is_err());
    }

    #[test]
    fn id_claim_is_accepted_when_sub_is_missing() {
        let service = TokenService::new(TEST_SECRET).expect("service should initialize");
        let mut claims = claims_with(json!([]));
        claims.sub = None;
        claims.id = Some("user-2".into());
        let token = service.issue(&claims).expect("token should be issued");

        assert_eq!(service.validate(&token).expect("token should validate").id, "user-2");
    }

    #[test]
    fn token_without_subject_is_rejected() {
        let service = TokenService::new(TEST_SECRET).expect("service should initialize");
        let mut claims = claims_with(json!([]));
        claims.sub = None;
        let token = service.issue(&claims).expect("token should be issued");

        assert!(service.validate(&token).is_err());
    }

    #[test]
    fn role_resolution_rules() {
        assert_eq!(resolve_role(&claims_with(json!(["Admin"]))), Role::Admin);
        assert_eq!(resolve_role(&claims_with(json!([{ "name": "EDITOR" }]))), Role::Editor);
        assert_eq!(resolve_role(&claims_with(json!(["editor", "admin"]))), Role::Admin);
        assert_eq!(resolve_role(&claims_with(json!(["reviewer"]))), Role::Viewer);
        assert_eq!(resolve_role(&claims_with(Value::Null)), Role::Viewer);

        let mut flagged = claims_with(json!(["viewer"]));
        flagged.is_admin = true;
        assert_eq!(resolve_role(&flagged), Role::Admin);

        let mut built_in = claims_with(json!([]));
        built_in.owner = Some("built-in".into());
        assert_eq!(resolve_role(&built_in), Role::Admin);

        let mut built_in_with_roles = claims_with(json!(["viewer"]));
        built_in_with_roles.owner = Some("built-in".into());
        assert_eq!(resolve_role(&built_in_with_roles), Role::Viewer);

        let mut nameless = claims_with(json!([{ "id": 7 }]));
        nameless.owner = Some("built-in".into());
        assert_eq!(resolve_role(&nameless), Role::Viewer, "a nameless role still counts as a role");
    }
}
