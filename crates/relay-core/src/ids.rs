//! Store key newtypes.
//!
//! Queue entries and backlog entries are keyed by opaque strings in the
//! remote store. The newtypes keep the two apart at compile time. Fresh IDs
//! are UUID v7 (time-ordered) generated via [`uuid::Uuid::now_v7`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! store_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// A fresh, time-ordered key.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// The key as stored.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

store_key!(
    /// Identifier of one entry in a channel's outgoing queue.
    EntryId
);

store_key!(
    /// Field key of one entry in a session backlog.
    BacklogKey
);
