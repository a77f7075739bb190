//! Identifier newtypes for riders, drivers, rides and live connections.
//!
//! Persistent ids (actors, rides) are UUID v7 so they sort by creation time.
//! Connection ids are random v4: they only live as long as one socket.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $ctor:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self($ctor())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
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
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Rider or driver account id. Issued by the account service; this crate
    /// never creates them outside tests.
    ActorId,
    Uuid::now_v7
);

uuid_id!(
    /// Ride document id.
    RideId,
    Uuid::now_v7
);

uuid_id!(
    /// Ephemeral id of one live push channel. Invalid once the socket closes.
    ConnectionId,
    Uuid::new_v4
);
