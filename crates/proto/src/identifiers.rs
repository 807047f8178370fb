//! Identifiers for simulator entities.

use std::fmt;

/// Simulator-assigned train id.
///
/// Distinct from the numeric designator embedded in the display name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrainId(pub i32);

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TrainId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Key of a topology node.
///
/// Some node records carry only a numeric element id, some only a name,
/// some both. The numeric id wins where present so that every node lands
/// in the same table under one key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Id(u32),
    Name(String),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Id(id) => write!(f, "{id}"),
            NodeKey::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Composite identity of one schedule entry: (train, platform, sequence).
///
/// The sequence number is stamped by the mirror when the entry is first
/// seen and never reused, so entries survive re-sorting by arrival time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub train: TrainId,
    pub platform: String,
    pub sequence: u32,
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.train, self.platform, self.sequence)
    }
}
