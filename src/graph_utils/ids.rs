use std::fmt;

use serde::{Deserialize, Serialize};

// Every id kind is minted from the same counter, so the textual values never
// collide across kinds even though the types keep them apart.
macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }
            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self { Self(s.to_string()) }
        }
    };
}

id_type!(NodeId);
id_type!(EdgeId);
id_type!(CorrelationId);

/// Session-wide id source.
///
/// Owned by the top-level application state and handed by `&mut` to whatever
/// needs to mint an id. Values start at 1 and only ever go up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self { Self::new() }
}

impl IdAllocator {
    pub fn new() -> Self { Self { next: 1 } }

    /// Continue a persisted session. A counter below 1 is bumped to 1.
    pub fn resume_from(next: u64) -> Self { Self { next: next.max(1) } }

    /// Return the current value as a string and advance the counter.
    pub fn next_id(&mut self) -> String {
        let id = self.next;
        self.next += 1;
        id.to_string()
    }

    pub fn next_edge_id(&mut self) -> EdgeId { EdgeId(self.next_id()) }
    pub fn next_correlation_id(&mut self) -> CorrelationId { CorrelationId(self.next_id()) }

    /// Value the next call to [`IdAllocator::next_id`] will hand out.
    pub fn peek(&self) -> u64 { self.next }

    /// Move forward to `other`'s counter if it is further along. Never moves
    /// backwards, so ids already handed out this session are not reissued.
    pub fn catch_up(&mut self, other: &IdAllocator) {
        self.next = self.next.max(other.next);
    }
}
