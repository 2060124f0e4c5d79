//! Namespace matching: does an event interest an application service?
//!
//! Every service is judged on its own. An `exclusive` namespace only tells
//! the homeserver who owns an identifier; it never hides an event from
//! another service whose namespaces also match.

use bridgeline_common::{ApplicationService, Event};

/// Whether `event` interests `service`, given the aliases of the event's room.
///
/// True if the sender matches a `users` namespace, the room ID matches a
/// `rooms` namespace, or any alias matches an `aliases` namespace.
pub fn matches(event: &Event, aliases: &[String], service: &ApplicationService) -> bool {
    matches_ids(event, service) || matches_aliases(aliases, service)
}

/// The part of [`matches`] that needs no alias lookup.
pub fn matches_ids(event: &Event, service: &ApplicationService) -> bool {
    service.is_interested_in_user(&event.sender) || service.is_interested_in_room(&event.room_id)
}

pub fn matches_aliases(aliases: &[String], service: &ApplicationService) -> bool {
    aliases.iter().any(|alias| service.is_interested_in_alias(alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridgeline_common::config::{
        AppServiceRegistration, NamespaceRegistration, NamespaceRegistrations,
    };

    fn ns(regex: &str, exclusive: bool) -> NamespaceRegistration {
        NamespaceRegistration { regex: regex.into(), exclusive }
    }

    fn service(id: &str, namespaces: NamespaceRegistrations) -> ApplicationService {
        ApplicationService::from_registration(&AppServiceRegistration {
            id: id.into(),
            url: "http://localhost:9000".into(),
            hs_token: "hs".into(),
            as_token: "as".into(),
            sender_localpart: format!("{id}_bot"),
            namespaces,
        })
        .unwrap()
    }

    fn from(sender: &str, room: &str) -> Event {
        Event::new("$e", room, sender, "m.room.message")
    }

    #[test]
    fn bot_namespace_selects_only_bot_senders() {
        let d = service(
            "d",
            NamespaceRegistrations { users: vec![ns("@bot_*", false)], ..Default::default() },
        );
        assert!(matches(&from("@bot_1:example", "!r:example"), &[], &d));
        assert!(!matches(&from("@alice:example", "!r:example"), &[], &d));
        assert!(matches(&from("@bot_2:example", "!r:example"), &[], &d));
    }

    #[test]
    fn room_and_alias_namespaces() {
        let d = service(
            "d",
            NamespaceRegistrations {
                rooms: vec![ns("^!bridged:example$", false)],
                aliases: vec![ns("^#irc_.*:example$", false)],
                ..Default::default()
            },
        );
        let in_bridged = from("@alice:example", "!bridged:example");
        let elsewhere = from("@alice:example", "!other:example");

        assert!(matches(&in_bridged, &[], &d));
        assert!(!matches(&elsewhere, &[], &d));
        assert!(matches(&elsewhere, &["#irc_rust:example".to_owned()], &d));
        assert!(!matches(&elsewhere, &["#rust:example".to_owned()], &d));
    }

    #[test]
    fn service_without_namespaces_matches_nothing() {
        let d = service("d", NamespaceRegistrations::default());
        assert!(!matches(&from("@alice:example", "!r:example"), &["#a:example".into()], &d));
    }

    #[test]
    fn exclusive_namespace_does_not_hide_event_from_others() {
        let owner = service(
            "owner",
            NamespaceRegistrations { users: vec![ns("^@irc_.*", true)], ..Default::default() },
        );
        let observer = service(
            "observer",
            NamespaceRegistrations { rooms: vec![ns("!r:example", false)], ..Default::default() },
        );
        let ev = from("@irc_alice:example", "!r:example");
        assert!(matches(&ev, &[], &owner));
        assert!(matches(&ev, &[], &observer));
    }
}
