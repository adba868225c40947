//! MemberDirectory: maps connection tokens to session identities.
//!
//! Browsers connect with `ws://host:port/?token=<secret>`.  The directory
//! looks the token up among the configured `[[members]]` and returns the
//! member's stable [`SessionId`] and [`Profile`].  Unknown or missing tokens
//! are refused, unless guest access is enabled, in which case the browser is
//! admitted as a viewer under a fresh random ID.

use std::collections::HashMap;

use uuid::Uuid;

use deskcast_core::{Permissions, Profile, SessionId};

use crate::infrastructure::storage::config::{MemberEntry, ServerConfig};

/// Identity handed to the server core for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub id: SessionId,
    pub profile: Profile,
}

/// Token-keyed member lookup.
#[derive(Debug, Clone, Default)]
pub struct MemberDirectory {
    by_token: HashMap<String, Admission>,
    allow_guests: bool,
}

impl MemberDirectory {
    pub fn new(members: &[MemberEntry], allow_guests: bool) -> Self {
        let by_token = members
            .iter()
            .map(|m| {
                (
                    m.token.clone(),
                    Admission {
                        id: SessionId::new(m.session_id()),
                        profile: Profile::new(m.name.clone(), m.permissions),
                    },
                )
            })
            .collect();
        Self {
            by_token,
            allow_guests,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.members, config.session.allow_guests)
    }

    /// Resolves `token` to an identity, or `None` if the connection must be
    /// refused.
    pub fn admit(&self, token: Option<&str>) -> Option<Admission> {
        if let Some(admission) = token.and_then(|t| self.by_token.get(t)) {
            return Some(admission.clone());
        }
        if !self.allow_guests {
            return None;
        }
        let suffix = Uuid::new_v4().simple().to_string();
        Some(Admission {
            id: SessionId::new(format!("guest-{}", &suffix[..8])),
            profile: Profile::new("guest", Permissions::viewer()),
        })
    }

    /// Number of configured members.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

/// Extracts the `token` query parameter from a request URI such as
/// `/?token=abc&x=1`.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<MemberEntry> {
        vec![
            MemberEntry {
                token: "admin-secret".into(),
                id: Some("root".into()),
                name: "Root".into(),
                permissions: Permissions::admin(),
            },
            MemberEntry {
                token: "alice-secret".into(),
                id: None,
                name: "alice".into(),
                permissions: Permissions::participant(),
            },
        ]
    }

    #[test]
    fn test_known_token_maps_to_stable_identity() {
        let dir = MemberDirectory::new(&members(), false);

        let first = dir.admit(Some("admin-secret")).unwrap();
        let second = dir.admit(Some("admin-secret")).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.id, SessionId::from("root"));
        assert!(first.profile.permissions.is_admin);
    }

    #[test]
    fn test_id_defaults_to_name() {
        let dir = MemberDirectory::new(&members(), false);
        assert_eq!(dir.admit(Some("alice-secret")).unwrap().id, SessionId::from("alice"));
    }

    #[test]
    fn test_unknown_token_is_refused_without_guests() {
        let dir = MemberDirectory::new(&members(), false);
        assert!(dir.admit(Some("wrong")).is_none());
        assert!(dir.admit(None).is_none());
    }

    #[test]
    fn test_guests_get_unique_viewer_identities() {
        let dir = MemberDirectory::new(&members(), true);

        let a = dir.admit(None).unwrap();
        let b = dir.admit(Some("wrong")).unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.id.as_str().starts_with("guest-"));
        assert_eq!(a.profile.permissions, Permissions::viewer());
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(token_from_query(Some("token=abc")), Some("abc".into()));
        assert_eq!(token_from_query(Some("x=1&token=abc")), Some("abc".into()));
        assert_eq!(token_from_query(Some("token=")), None);
        assert_eq!(token_from_query(Some("other=1")), None);
        assert_eq!(token_from_query(None), None);
    }
}
