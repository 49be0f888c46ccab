//! Authenticated identity of the current user and role capability checks.
//!
//! Roles arrive from the backend as Spring authorities ("ROLE_DOCTOR"), either as a JSON array
//! or as a stringified array ("[ROLE_USER, ROLE_VIP]") in the login response. Both are parsed
//! into a set of [`Role`].

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Backend user id.
pub type UserId = i64;

/// A backend authority. Unknown authorities are kept verbatim (without the `ROLE_` prefix).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Doctor,
    PendingDoctor,
    Vip,
    User,
    Other(String),
}

impl Role {
    /// Parse an authority name; the `ROLE_` prefix and surrounding whitespace/quotes are optional.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().trim_matches('"').trim();
        let name = s.strip_prefix("ROLE_").unwrap_or(s);
        match name.to_ascii_uppercase().as_str() {
            "ADMIN" => Role::Admin,
            "DOCTOR" => Role::Doctor,
            "PENDING_DOCTOR" => Role::PendingDoctor,
            "VIP" => Role::Vip,
            "USER" => Role::User,
            _ => Role::Other(name.to_string()),
        }
    }

    /// Name without the `ROLE_` prefix.
    pub fn name(&self) -> &str {
        match self {
            Role::Admin => "ADMIN",
            Role::Doctor => "DOCTOR",
            Role::PendingDoctor => "PENDING_DOCTOR",
            Role::Vip => "VIP",
            Role::User => "USER",
            Role::Other(s) => s,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROLE_{}", self.name())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::parse(&s)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role::parse(s)
    }
}

impl From<Role> for String {
    fn from(r: Role) -> Self {
        r.to_string()
    }
}

/// Parse a stringified authority list such as "[ROLE_USER, ROLE_VIP]" or "ROLE_USER,ROLE_VIP".
pub fn parse_role_list(s: &str) -> BTreeSet<Role> {
    s.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(Role::parse)
        .collect()
}

/// Accepts `["ROLE_A", "ROLE_B"]`, `"[ROLE_A, ROLE_B]"`, or null.
pub(crate) fn deserialize_roles<'de, D>(deserializer: D) -> Result<BTreeSet<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        List(Vec<String>),
        Text(String),
    }
    Ok(match Option::<Wire>::deserialize(deserializer)? {
        Some(Wire::List(items)) => items.iter().map(|r| Role::parse(r)).collect(),
        Some(Wire::Text(s)) => parse_role_list(&s),
        None => BTreeSet::new(),
    })
}

/// The authenticated identity of the current user as known to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_roles")]
    pub roles: BTreeSet<Role>,
    pub authenticated: bool,
}

impl Session {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            email: None,
            roles: BTreeSet::new(),
            authenticated: true,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// Identity usable for a channel connection: present only while authenticated.
    pub fn identity(&self) -> Option<UserId> {
        self.authenticated.then_some(self.user_id)
    }
}

/// Capability check over an optional session (no session => no roles).
pub fn has_role(session: Option<&Session>, role: &Role) -> bool {
    session.map(|s| s.has_role(role)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_prefix_and_keeps_unknown() {
        assert_eq!(Role::parse("ROLE_DOCTOR"), Role::Doctor);
        assert_eq!(Role::parse(" vip "), Role::Vip);
        assert_eq!(Role::parse("ROLE_PENDING_DOCTOR"), Role::PendingDoctor);
        assert_eq!(Role::parse("ROLE_GROOMER"), Role::Other("GROOMER".into()));
        assert_eq!(Role::Doctor.to_string(), "ROLE_DOCTOR");
    }

    #[test]
    fn stringified_list_from_login_response() {
        let roles = parse_role_list("[ROLE_USER, ROLE_VIP]");
        assert!(roles.contains(&Role::User));
        assert!(roles.contains(&Role::Vip));
        assert_eq!(roles.len(), 2);
        assert!(parse_role_list("[]").is_empty());
    }

    #[test]
    fn session_deserializes_both_role_shapes() {
        let a: Session = serde_json::from_str(
            r#"{"userId":1,"displayName":"kim","roles":["ROLE_ADMIN"],"authenticated":true}"#,
        )
        .unwrap();
        assert!(a.has_role(&Role::Admin));
        let b: Session = serde_json::from_str(
            r#"{"userId":2,"displayName":"lee","roles":"[ROLE_DOCTOR]","authenticated":true}"#,
        )
        .unwrap();
        assert!(b.has_role(&Role::Doctor));
        assert!(!b.has_role(&Role::Admin));
    }

    #[test]
    fn identity_requires_authentication() {
        let mut s = Session::new(9, "park");
        assert_eq!(s.identity(), Some(9));
        s.authenticated = false;
        assert_eq!(s.identity(), None);
        assert!(!has_role(None, &Role::User));
    }
}
