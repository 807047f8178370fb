//! Client-side mirror of the simulator's state.
//!
//! Each `apply_*` method folds one response into the tables. Refreshes are
//! per item and idempotent: re-applying an unchanged response leaves the
//! mirror identical. Two retention rules differ from the simulator's own
//! view and are deliberate: trains stay in the table after they leave the
//! roster, and schedule entries the simulator has dropped (already visited)
//! stay in the train's schedule. Both let consumers reconstruct a full
//! session after the fact; memory grows with the session, which is fine for
//! shifts measured in hours.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use stellwerk_proto::messages::ConnectorEnd;
use stellwerk_proto::{
    EntryKey, FacilityInfo, NodeKey, NodeKind, PlatformInfo, TimetableRow, TrackConnector,
    TrackNode, TrainDetails, TrainHeader, TrainId, TrainLink,
};

/// A platform and its neighborhood, symmetric regardless of which side
/// declared the edge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
    pub is_halt: bool,
    pub neighbors: BTreeSet<String>,
}

/// A topology node with its resolved neighbors.
///
/// Unlike platform neighborhood, topology adjacency is kept exactly as
/// reported: a connector from `a` to `b` records `b` as a neighbor of `a`
/// only. The simulator usually reports both directions; where it does not,
/// the asymmetry is information, not noise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub key: NodeKey,
    pub id: Option<u32>,
    pub name: Option<String>,
    pub kind: NodeKind,
    pub neighbors: BTreeSet<NodeKey>,
}

/// One stop of a train's timetable, identified by (train, planned
/// platform, sequence). The sequence is stamped on first sight and never
/// reused, so an entry keeps its identity across refreshes and re-sorting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub key: EntryKey,
    pub platform: String,
    pub planned_platform: String,
    pub arrival: Option<i32>,
    pub departure: Option<i32>,
    pub passes_through: bool,
    pub changes_direction: bool,
    pub link: Option<TrainLink>,
}

impl ScheduleEntry {
    fn from_row(train: TrainId, row: &TimetableRow, sequence: u32) -> Self {
        Self {
            key: EntryKey {
                train,
                platform: row.planned_platform.clone(),
                sequence,
            },
            platform: row.platform.clone(),
            planned_platform: row.planned_platform.clone(),
            arrival: row.arrival,
            departure: row.departure,
            passes_through: row.passes_through(),
            changes_direction: row.changes_direction(),
            link: row.link(),
        }
    }

    fn refresh(&mut self, row: &TimetableRow) {
        self.platform = row.platform.clone();
        self.arrival = row.arrival;
        self.departure = row.departure;
        self.passes_through = row.passes_through();
        self.changes_direction = row.changes_direction();
        self.link = row.link();
    }
}

/// Everything known about one train, merged from roster, details and
/// timetable responses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Train {
    pub id: TrainId,
    pub name: String,
    pub delay: i32,
    pub platform: String,
    pub planned_platform: String,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub visible: bool,
    pub at_platform: bool,
    pub schedule: Vec<ScheduleEntry>,
    next_sequence: u32,
}

impl Train {
    fn new(id: TrainId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Outgoing links of this train's schedule, in timetable order.
    pub fn links(&self) -> impl Iterator<Item = (&ScheduleEntry, TrainLink)> {
        self.schedule
            .iter()
            .filter_map(|entry| entry.link.map(|link| (entry, link)))
    }
}

#[derive(Debug, Default)]
pub struct Mirror {
    facility: Option<FacilityInfo>,
    platforms: HashMap<String, Platform>,
    nodes: HashMap<NodeKey, Node>,
    nodes_by_name: HashMap<String, NodeKey>,
    trains: HashMap<TrainId, Train>,
    live: HashSet<TrainId>,
    categories: BTreeSet<String>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn facility(&self) -> Option<&FacilityInfo> {
        self.facility.as_ref()
    }

    pub fn set_facility(&mut self, info: FacilityInfo) {
        self.facility = Some(info);
    }

    pub fn platform(&self, name: &str) -> Option<&Platform> {
        self.platforms.get(name)
    }

    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.values()
    }

    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes_by_name.get(name).and_then(|k| self.nodes.get(k))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn train(&self, id: TrainId) -> Option<&Train> {
        self.trains.get(&id)
    }

    pub fn trains(&self) -> impl Iterator<Item = &Train> {
        self.trains.values()
    }

    /// Trains present in the most recent roster. Everything else in the
    /// train table has already left the facility.
    pub fn live_trains(&self) -> impl Iterator<Item = &Train> {
        self.trains
            .values()
            .filter(|t| self.live.contains(&t.id))
    }

    pub fn is_live(&self, id: TrainId) -> bool {
        self.live.contains(&id)
    }

    /// Train categories seen so far, e.g. "ICE", "S8".
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    /// Replace the platform table. Neighborhood is made symmetric: a
    /// declaration on either side is enough.
    pub fn apply_platform_list(&mut self, list: Vec<PlatformInfo>) {
        self.platforms.clear();
        for info in &list {
            self.platforms.insert(
                info.name.clone(),
                Platform {
                    name: info.name.clone(),
                    is_halt: info.is_halt,
                    neighbors: info.neighbors.iter().cloned().collect(),
                },
            );
        }
        for info in list {
            for neighbor in info.neighbors {
                if let Some(other) = self.platforms.get_mut(&neighbor) {
                    other.neighbors.insert(info.name.clone());
                } else {
                    debug!(platform = %info.name, neighbor = %neighbor, "neighbor not in platform list");
                }
            }
        }
    }

    /// Replace the topology table. Connector ends are resolved against the
    /// node batch by id or name; an end that resolves to nothing drops the
    /// whole connector.
    pub fn apply_node_list(&mut self, nodes: Vec<TrackNode>, connectors: Vec<TrackConnector>) {
        self.nodes.clear();
        self.nodes_by_name.clear();
        for node in nodes {
            let Some(key) = node.key() else {
                debug!("dropping topology row with neither id nor name");
                continue;
            };
            if let Some(name) = &node.name {
                self.nodes_by_name.insert(name.clone(), key.clone());
            }
            self.nodes.insert(
                key.clone(),
                Node {
                    key,
                    id: node.id,
                    name: node.name,
                    kind: node.kind,
                    neighbors: BTreeSet::new(),
                },
            );
        }
        for connector in connectors {
            let (Some(a), Some(b)) = (
                self.resolve_end(&connector.a),
                self.resolve_end(&connector.b),
            ) else {
                debug!(?connector, "dropping connector with unresolved end");
                continue;
            };
            if let Some(node) = self.nodes.get_mut(&a) {
                node.neighbors.insert(b);
            }
        }
    }

    fn resolve_end(&self, end: &ConnectorEnd) -> Option<NodeKey> {
        match end {
            ConnectorEnd::Id(id) => {
                let key = NodeKey::Id(*id);
                self.nodes.contains_key(&key).then_some(key)
            }
            ConnectorEnd::Name(name) => self.nodes_by_name.get(name).cloned(),
        }
    }

    /// Fold in the roster: every listed train is upserted and marked live,
    /// trains missing from the roster are kept but lose their live flag.
    pub fn apply_train_roster(&mut self, roster: Vec<TrainHeader>) {
        self.live.clear();
        for header in roster {
            self.live.insert(header.id);
            let train = self
                .trains
                .entry(header.id)
                .or_insert_with(|| Train::new(header.id));
            train.name = header.name;
        }
    }

    /// Fold in one train's details, preserving its schedule.
    pub fn apply_train_details(&mut self, details: TrainDetails) {
        if let Some(category) = details.category() {
            self.categories.insert(category.to_string());
        }
        let train = self
            .trains
            .entry(details.id)
            .or_insert_with(|| Train::new(details.id));
        train.name = details.name;
        train.delay = details.delay;
        train.platform = details.platform;
        train.planned_platform = details.planned_platform;
        train.origin = details.origin;
        train.destination = details.destination;
        train.visible = details.visible;
        train.at_platform = details.at_platform;
    }

    /// Merge a timetable response into the train's schedule.
    ///
    /// Each row claims the first not-yet-claimed entry with the same
    /// planned platform, so a refresh updates in place and a line that
    /// visits a platform twice keeps two entries. Rows without a match are
    /// appended with a fresh sequence number. Entries the response no
    /// longer carries are kept: the simulator drops visited stops, the
    /// mirror does not.
    pub fn apply_train_schedule(&mut self, id: TrainId, rows: Vec<TimetableRow>) {
        let train = self.trains.entry(id).or_insert_with(|| Train::new(id));
        let mut claimed = vec![false; train.schedule.len()];
        for row in rows {
            let existing = train
                .schedule
                .iter()
                .enumerate()
                .find(|(i, e)| !claimed[*i] && e.planned_platform == row.planned_platform)
                .map(|(i, _)| i);
            match existing {
                Some(i) => {
                    claimed[i] = true;
                    train.schedule[i].refresh(&row);
                }
                None => {
                    let sequence = train.next_sequence;
                    train.next_sequence += 1;
                    train.schedule.push(ScheduleEntry::from_row(id, &row, sequence));
                    claimed.push(true);
                }
            }
        }
        // An origin stop has no arrival; its departure orders it.
        train
            .schedule
            .sort_by_key(|e| (e.arrival.or(e.departure).unwrap_or(i32::MAX), e.key.sequence));
    }
}
