//! Application service (bridge) definitions.
//!
//! An [`ApplicationService`] is built once from its registration at startup
//! and never changes afterwards. Namespace regexes are compiled up front so a
//! bad pattern fails the boot instead of silently matching nothing later.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{AppServiceRegistration, NamespaceRegistration};
use crate::error::ConfigError;
use crate::validation::validate_registration;

/// Which identifier a namespace applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    Users,
    Rooms,
    Aliases,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Users => "users",
            Self::Rooms => "rooms",
            Self::Aliases => "aliases",
        })
    }
}

/// A compiled namespace pattern.
///
/// Patterns match anywhere in the candidate (unanchored), so `@bot_.*` and
/// `@bot_` select the same users. Registrations that want a full match must
/// anchor with `^…$` themselves.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub kind: NamespaceKind,
    pub exclusive: bool,
    regex: Regex,
}

impl Namespace {
    pub fn new(kind: NamespaceKind, pattern: &str, exclusive: bool) -> Result<Self, regex::Error> {
        Ok(Self { kind, exclusive, regex: Regex::new(pattern)? })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// A registered application service, one per delivery destination.
#[derive(Debug, Clone)]
pub struct ApplicationService {
    /// Unique registration ID.
    pub id: String,
    /// Base URL transactions are pushed to.
    pub url: String,
    /// Token we present to the bridge on every push.
    pub hs_token: String,
    /// Token the bridge presents to us; used as the masquerade device token.
    pub as_token: String,
    /// Localpart of the bot user the bridge masquerades as by default.
    pub sender_localpart: String,
    pub namespaces: Vec<Namespace>,
}

impl ApplicationService {
    /// Validate a registration and compile its namespaces.
    pub fn from_registration(reg: &AppServiceRegistration) -> Result<Self, ConfigError> {
        validate_registration(reg)?;

        let mut namespaces = Vec::new();
        let groups = [
            (NamespaceKind::Users, &reg.namespaces.users),
            (NamespaceKind::Rooms, &reg.namespaces.rooms),
            (NamespaceKind::Aliases, &reg.namespaces.aliases),
        ];
        for (kind, entries) in groups {
            for NamespaceRegistration { regex, exclusive } in entries {
                let ns = Namespace::new(kind, regex, *exclusive).map_err(|source| {
                    ConfigError::InvalidNamespace {
                        id: reg.id.clone(),
                        kind,
                        pattern: regex.clone(),
                        source,
                    }
                })?;
                namespaces.push(ns);
            }
        }

        Ok(Self {
            id: reg.id.clone(),
            url: reg.url.trim_end_matches('/').to_owned(),
            hs_token: reg.hs_token.clone(),
            as_token: reg.as_token.clone(),
            sender_localpart: reg.sender_localpart.clone(),
            namespaces,
        })
    }

    /// Namespaces of one kind, in registration order.
    pub fn namespaces_of(&self, kind: NamespaceKind) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter().filter(move |ns| ns.kind == kind)
    }

    pub fn is_interested_in_user(&self, user_id: &str) -> bool {
        self.namespaces_of(NamespaceKind::Users).any(|ns| ns.is_match(user_id))
    }

    pub fn is_interested_in_room(&self, room_id: &str) -> bool {
        self.namespaces_of(NamespaceKind::Rooms).any(|ns| ns.is_match(room_id))
    }

    pub fn is_interested_in_alias(&self, alias: &str) -> bool {
        self.namespaces_of(NamespaceKind::Aliases).any(|ns| ns.is_match(alias))
    }

    /// Whether matching this service can ever depend on room aliases.
    pub fn wants_aliases(&self) -> bool {
        self.namespaces_of(NamespaceKind::Aliases).next().is_some()
    }

    /// Full user ID of the masquerade account (`@localpart:server_name`).
    pub fn sender_user_id(&self, server_name: &str) -> String {
        format!("@{}:{}", self.sender_localpart, server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceRegistrations;

    fn registration(users: &[&str]) -> AppServiceRegistration {
        AppServiceRegistration {
            id: "irc".into(),
            url: "http://localhost:9000/".into(),
            hs_token: "hs_secret".into(),
            as_token: "as_secret".into(),
            sender_localpart: "irc_bot".into(),
            namespaces: NamespaceRegistrations {
                users: users
                    .iter()
                    .map(|r| NamespaceRegistration { regex: (*r).into(), exclusive: true })
                    .collect(),
                rooms: vec![],
                aliases: vec![NamespaceRegistration { regex: "#irc_.*".into(), exclusive: false }],
            },
        }
    }

    #[test]
    fn compiles_namespaces_and_trims_url() {
        let svc = ApplicationService::from_registration(&registration(&["@irc_.*"])).unwrap();
        assert_eq!(svc.url, "http://localhost:9000");
        assert!(svc.is_interested_in_user("@irc_alice:example"));
        assert!(!svc.is_interested_in_user("@alice:example"));
        assert!(svc.is_interested_in_alias("#irc_rust:example"));
        assert!(svc.wants_aliases());
        assert_eq!(svc.sender_user_id("example"), "@irc_bot:example");
    }

    #[test]
    fn rejects_bad_regex() {
        let err = ApplicationService::from_registration(&registration(&["@irc_(("])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNamespace { kind: NamespaceKind::Users, .. }));
    }

    #[test]
    fn unanchored_patterns_match_substrings() {
        let ns = Namespace::new(NamespaceKind::Users, "@bot_*", false).unwrap();
        assert!(ns.is_match("@bot_1:example"));
        assert!(!ns.is_match("@alice:example"));
    }
}
