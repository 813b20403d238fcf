//! Branded ID newtypes for type safety.
//!
//! Every entity tracked by the sync core has a distinct ID type implemented
//! as a newtype wrapper around `String`. This prevents accidentally passing a
//! session ID where a message ID is expected.
//!
//! Canonical IDs arrive from the event stream and are taken verbatim.
//! Locally generated IDs (optimistic records) are UUID v7 (time-ordered)
//! generated via [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

branded_id! {
    /// Identifier of a chat session.
    SessionId
}

branded_id! {
    /// Identifier of a message within a session.
    MessageId
}

branded_id! {
    /// Identifier of a message part.
    PartId
}

branded_id! {
    /// Identifier of an inbound stream event, used for deduplication.
    EventId
}

branded_id! {
    /// Identifier of a pending permission or question request.
    RequestId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_new_is_uuid_v7() {
        let id = MessageId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = PartId::new();
        let b = PartId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn canonical_ids_are_taken_verbatim() {
        let id = MessageId::from("msg_01HZX");
        assert_eq!(id.as_str(), "msg_01HZX");
        assert_eq!(id, "msg_01HZX");
    }

    #[test]
    fn deref_to_str() {
        let id = SessionId::from("ses_1");
        let s: &str = &id;
        assert_eq!(s, "ses_1");
    }

    #[test]
    fn borrow_allows_str_lookup() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        let _ = map.insert(PartId::from("p1"), 1);
        assert_eq!(map.get("p1"), Some(&1));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = EventId::from("evt-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"evt-1\"");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut ids = vec![MessageId::from("b"), MessageId::from("a")];
        ids.sort();
        assert_eq!(ids[0], "a");
    }
}
