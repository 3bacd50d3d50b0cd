//! Identifier newtypes and timestamps.
//!
//! All identifiers are opaque strings on the wire. Newtypes keep the send
//! path from confusing a server message id with a client-generated one: the
//! former is assigned at persistence time, the latter survives retries and
//! drives de-duplication.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct UserId(pub String);

/// A server-assigned, stable message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct MessageId(pub String);

/// A client-assigned message identifier, stable across retries.
///
/// At most one timeline entity per `ClientMessageId` is ever visible: either
/// its pending form or its confirmed form, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ClientMessageId(pub String);

/// A two-party conversation thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Deterministic thread id for a pair of members: the sorted
    /// concatenation of the two user ids.
    ///
    /// Both participants compute the same id regardless of who opens the
    /// thread first.
    pub fn for_members(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self(format!("{}_{}", lo.0, hi.0))
    }
}

macro_rules! impl_display {
    ($($name:ident),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

impl_display!(UserId, MessageId, ClientMessageId, ThreadId);

/// A server-assigned timestamp in Unix milliseconds.
///
/// The authoritative ordering key for confirmed messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Milliseconds since the Unix epoch.
    pub fn millis(self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_is_order_independent() {
        let alice = UserId("alice".into());
        let bob = UserId("bob".into());

        assert_eq!(ThreadId::for_members(&alice, &bob), ThreadId::for_members(&bob, &alice));
        assert_eq!(ThreadId::for_members(&alice, &bob).0, "alice_bob");
    }

    #[test]
    fn thread_id_for_identical_ids_is_stable() {
        let user = UserId("solo".into());
        assert_eq!(ThreadId::for_members(&user, &user).0, "solo_solo");
    }

    #[test]
    fn timestamps_order_numerically() {
        assert!(Timestamp(1) < Timestamp(2));
        assert!(Timestamp(-1) < Timestamp(0));
    }
}
