//! Graph synthesis from the mirror.
//!
//! Four graphs, each folded from the tables by a `sync_*` method:
//!
//! * topology: directed, one node per track element, unit edges exactly as
//!   the connectors report them,
//! * platforms: undirected, platforms linked to their interlocking group,
//! * trains: directed, one node per train, edges for planned links,
//! * schedule: directed, one node per schedule entry, planned-run edges
//!   along each timetable plus cross-train link edges.
//!
//! Syncs are additive: nodes are upserted, edges added only when the same
//! edge is not already present, so re-syncing after a refresh converges
//! instead of duplicating. [`GraphSet::rebuild`] is the explicit clean
//! slate.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use petgraph::{EdgeType, Graph};
use tracing::debug;

use stellwerk_proto::{EntryKey, NodeKey, NodeKind, TrainId, TrainLink};

use crate::mirror::{Mirror, ScheduleEntry, Train};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopoNode {
    pub key: NodeKey,
    pub kind: NodeKind,
}

/// Unit hop between adjacent track elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopoEdge {
    pub distance: u32,
}

/// Zero-cost membership edge inside one interlocking group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlatformEdge {
    pub distance: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainNode {
    pub id: TrainId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Replacement,
    Coupling,
    Splitting,
}

impl From<TrainLink> for LinkKind {
    fn from(link: TrainLink) -> Self {
        match link {
            TrainLink::Replacement(_) => Self::Replacement,
            TrainLink::Coupling(_) => Self::Coupling,
            TrainLink::Splitting(_) => Self::Splitting,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleNode {
    pub key: EntryKey,
    pub platform: String,
    pub arrival: Option<i32>,
    pub departure: Option<i32>,
    /// False for pass-through entries.
    pub stop: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleRelation {
    /// Consecutive entries of one train's timetable.
    PlannedRun,
    Link(LinkKind),
}

#[derive(Debug, Default)]
pub struct GraphSet {
    topology: DiGraph<TopoNode, TopoEdge>,
    topo_index: HashMap<NodeKey, NodeIndex>,
    platforms: UnGraph<String, PlatformEdge>,
    platform_index: HashMap<String, NodeIndex>,
    trains: DiGraph<TrainNode, LinkKind>,
    train_index: HashMap<TrainId, NodeIndex>,
    schedule: DiGraph<ScheduleNode, ScheduleRelation>,
    schedule_index: HashMap<EntryKey, NodeIndex>,
}

impl GraphSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topology(&self) -> &DiGraph<TopoNode, TopoEdge> {
        &self.topology
    }

    pub fn platforms(&self) -> &UnGraph<String, PlatformEdge> {
        &self.platforms
    }

    pub fn trains(&self) -> &DiGraph<TrainNode, LinkKind> {
        &self.trains
    }

    pub fn schedule(&self) -> &DiGraph<ScheduleNode, ScheduleRelation> {
        &self.schedule
    }

    pub fn topo_node(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.topo_index.get(key).copied()
    }

    pub fn platform_node(&self, name: &str) -> Option<NodeIndex> {
        self.platform_index.get(name).copied()
    }

    pub fn train_node(&self, id: TrainId) -> Option<NodeIndex> {
        self.train_index.get(&id).copied()
    }

    pub fn schedule_node(&self, key: &EntryKey) -> Option<NodeIndex> {
        self.schedule_index.get(key).copied()
    }

    /// Fold the mirror's topology table into the topology graph.
    pub fn sync_topology(&mut self, mirror: &Mirror) {
        for node in mirror.nodes() {
            let idx = self.ensure_topo(node.key.clone(), node.kind);
            self.topology[idx].kind = node.kind;
        }
        for node in mirror.nodes() {
            let a = self.topo_index[&node.key];
            for neighbor in &node.neighbors {
                let b = match self.topo_index.get(neighbor) {
                    Some(b) => *b,
                    None => continue,
                };
                ensure_edge(&mut self.topology, a, b, TopoEdge { distance: 1 });
            }
        }
    }

    /// Fold the mirror's platform table into the platform graph.
    pub fn sync_platforms(&mut self, mirror: &Mirror) {
        for platform in mirror.platforms() {
            self.ensure_platform(&platform.name);
        }
        for platform in mirror.platforms() {
            let a = self.platform_index[&platform.name];
            for neighbor in &platform.neighbors {
                let b = self.ensure_platform(neighbor);
                ensure_edge(&mut self.platforms, a, b, PlatformEdge { distance: 0 });
            }
        }
    }

    /// Fold one train and its planned links into the train graph.
    ///
    /// Link targets not yet in the mirror still get a node; their name
    /// fills in once their details arrive.
    pub fn sync_train(&mut self, mirror: &Mirror, id: TrainId) {
        let Some(train) = mirror.train(id) else {
            return;
        };
        let source = self.ensure_train(id, &train.name);
        for (_, link) in train.links() {
            let target_id = link.target();
            if target_id == id {
                debug!(train = %id, "ignoring self-referential link");
                continue;
            }
            let target_name = mirror
                .train(target_id)
                .map(|t| t.name.clone())
                .unwrap_or_default();
            let target = self.ensure_train(target_id, &target_name);
            ensure_edge(&mut self.trains, source, target, link.into());
        }
    }

    /// Fold one train's schedule into the schedule graph: a node per entry,
    /// planned-run edges between consecutive entries and link edges into
    /// the target train's schedule.
    ///
    /// A replacement or splitting link lands on the first entry of the
    /// target's schedule; a coupling link lands on the target's entry at
    /// the same platform and arrival. An unresolvable link edge is skipped
    /// until a later sync sees the target's schedule.
    pub fn sync_schedule(&mut self, mirror: &Mirror, id: TrainId) {
        let Some(train) = mirror.train(id) else {
            return;
        };
        for entry in &train.schedule {
            self.ensure_schedule_entry(entry);
        }
        for pair in train.schedule.windows(2) {
            let a = self.schedule_index[&pair[0].key];
            let b = self.schedule_index[&pair[1].key];
            ensure_edge(&mut self.schedule, a, b, ScheduleRelation::PlannedRun);
        }
        for (entry, link) in train.links() {
            let source = self.schedule_index[&entry.key];
            let Some(target) = self.resolve_link_entry(mirror, entry, link) else {
                debug!(train = %id, link = ?link, "link target schedule not mirrored yet");
                continue;
            };
            let target = self.ensure_schedule_entry(&target);
            ensure_edge(
                &mut self.schedule,
                source,
                target,
                ScheduleRelation::Link(link.into()),
            );
        }
    }

    /// Discard everything and fold the whole mirror back in.
    pub fn rebuild(&mut self, mirror: &Mirror) {
        self.topology.clear();
        self.topo_index.clear();
        self.platforms.clear();
        self.platform_index.clear();
        self.trains.clear();
        self.train_index.clear();
        self.schedule.clear();
        self.schedule_index.clear();

        self.sync_topology(mirror);
        self.sync_platforms(mirror);
        let ids: Vec<TrainId> = mirror.trains().map(|t| t.id).collect();
        for id in &ids {
            self.sync_train(mirror, *id);
        }
        for id in ids {
            self.sync_schedule(mirror, id);
        }
    }

    fn resolve_link_entry(
        &self,
        mirror: &Mirror,
        entry: &ScheduleEntry,
        link: TrainLink,
    ) -> Option<ScheduleEntry> {
        let target: &Train = mirror.train(link.target())?;
        match link {
            TrainLink::Replacement(_) | TrainLink::Splitting(_) => {
                target.schedule.first().cloned()
            }
            TrainLink::Coupling(_) => target
                .schedule
                .iter()
                .find(|e| {
                    e.planned_platform == entry.planned_platform && e.arrival == entry.arrival
                })
                .cloned(),
        }
    }

    fn ensure_topo(&mut self, key: NodeKey, kind: NodeKind) -> NodeIndex {
        if let Some(idx) = self.topo_index.get(&key) {
            return *idx;
        }
        let idx = self.topology.add_node(TopoNode {
            key: key.clone(),
            kind,
        });
        self.topo_index.insert(key, idx);
        idx
    }

    fn ensure_platform(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.platform_index.get(name) {
            return *idx;
        }
        let idx = self.platforms.add_node(name.to_string());
        self.platform_index.insert(name.to_string(), idx);
        idx
    }

    fn ensure_train(&mut self, id: TrainId, name: &str) -> NodeIndex {
        if let Some(idx) = self.train_index.get(&id) {
            let idx = *idx;
            if !name.is_empty() {
                self.trains[idx].name = name.to_string();
            }
            return idx;
        }
        let idx = self.trains.add_node(TrainNode {
            id,
            name: name.to_string(),
        });
        self.train_index.insert(id, idx);
        idx
    }

    fn ensure_schedule_entry(&mut self, entry: &ScheduleEntry) -> NodeIndex {
        if let Some(idx) = self.schedule_index.get(&entry.key) {
            let idx = *idx;
            let node = &mut self.schedule[idx];
            node.platform = entry.platform.clone();
            node.arrival = entry.arrival;
            node.departure = entry.departure;
            node.stop = !entry.passes_through;
            return idx;
        }
        let idx = self.schedule.add_node(ScheduleNode {
            key: entry.key.clone(),
            platform: entry.platform.clone(),
            arrival: entry.arrival,
            departure: entry.departure,
            stop: !entry.passes_through,
        });
        self.schedule_index.insert(entry.key.clone(), idx);
        idx
    }
}

fn ensure_edge<N, E, Ty>(graph: &mut Graph<N, E, Ty>, a: NodeIndex, b: NodeIndex, weight: E)
where
    E: PartialEq,
    Ty: EdgeType,
{
    let present = graph
        .edges_connecting(a, b)
        .any(|edge| *edge.weight() == weight);
    if !present {
        graph.add_edge(a, b, weight);
    }
}
