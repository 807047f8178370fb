//! Line graph: stations connected by the runs the schedules actually make,
//! weighted with travel-time statistics.
//!
//! Built from planned-run edges whose endpoint stations differ, then
//! reconciled against the track topology: where the physical path between
//! two stations passes through another station's platform, the line edge is
//! subdivided there and its statistics halved, until the graph is stable.
//! A final pass removes the long chord of each detour cycle; cycles with no
//! clear chord are reported and kept.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableUnGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use tracing::warn;

use stellwerk_client::graphs::ScheduleRelation;
use stellwerk_client::{GraphSet, Mirror};
use stellwerk_proto::NodeKind;

use crate::station::{name_prefix, Place, PlaceKind, StationGraph};

/// Travel-time statistics of one line section, in minutes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineStats {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u32,
}

impl LineStats {
    pub fn new(minutes: f64) -> Self {
        Self {
            min: minutes,
            max: minutes,
            sum: minutes,
            count: 1,
        }
    }

    pub fn record(&mut self, minutes: f64) {
        self.min = self.min.min(minutes);
        self.max = self.max.max(minutes);
        self.sum += minutes;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &LineStats) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Statistics of one half of a subdivided section. Sample count is
    /// kept, every time is split evenly, so the two halves' means add back
    /// up to the whole.
    pub fn halved(&self) -> Self {
        Self {
            min: self.min / 2.0,
            max: self.max / 2.0,
            sum: self.sum / 2.0,
            count: self.count,
        }
    }
}

#[derive(Debug, Default)]
pub struct LineGraph {
    graph: StableUnGraph<Place, LineStats>,
    index: HashMap<Place, NodeIndex>,
}

impl LineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// One pass over the schedule graph's planned-run edges. Runs whose
    /// endpoint stations coincide are internal to a station and carry no
    /// line information.
    pub fn build(graphs: &GraphSet, stations: &StationGraph) -> Self {
        let mut lines = Self::new();
        let schedule = graphs.schedule();
        for edge in schedule.edge_references() {
            if *edge.weight() != ScheduleRelation::PlannedRun {
                continue;
            }
            let from = &schedule[edge.source()];
            let to = &schedule[edge.target()];
            let (Some(dep), Some(arr)) = (
                from.departure.or(from.arrival),
                to.arrival.or(to.departure),
            ) else {
                continue;
            };
            let (Some(a), Some(b)) = (
                stations.superior_of_name(&from.key.platform).cloned(),
                stations.superior_of_name(&to.key.platform).cloned(),
            ) else {
                continue;
            };
            if a == b {
                continue;
            }
            let minutes = f64::from((arr - dep).max(1));
            lines.record_travel(a, b, minutes);
        }
        lines
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.graph.node_weights()
    }

    pub fn sections(&self) -> impl Iterator<Item = (&Place, &Place, &LineStats)> {
        self.graph.edge_references().map(|edge| {
            (
                &self.graph[edge.source()],
                &self.graph[edge.target()],
                edge.weight(),
            )
        })
    }

    pub fn stats_between(&self, a: &Place, b: &Place) -> Option<&LineStats> {
        let (ai, bi) = (*self.index.get(a)?, *self.index.get(b)?);
        let edge = self.graph.find_edge(ai, bi)?;
        self.graph.edge_weight(edge)
    }

    /// Fold one observed run into the section between two stations.
    pub fn record_travel(&mut self, a: Place, b: Place, minutes: f64) {
        let (ai, bi) = (self.ensure(&a), self.ensure(&b));
        match self.graph.find_edge(ai, bi) {
            Some(edge) => {
                if let Some(stats) = self.graph.edge_weight_mut(edge) {
                    stats.record(minutes);
                }
            }
            None => {
                self.graph.add_edge(ai, bi, LineStats::new(minutes));
            }
        }
    }

    /// Subdivide sections that physically pass through another station.
    ///
    /// For each section, the shortest topology path (by hop count) between
    /// representative track nodes of its endpoints is scanned for platform
    /// or waypoint nodes belonging to a third station; the first hit splits
    /// the section there with halved statistics, and both halves go back on
    /// the worklist. Platforms met on the way that have no station yet are
    /// promoted under their name prefix.
    pub fn reconcile(&mut self, mirror: &Mirror, graphs: &GraphSet, stations: &mut StationGraph) {
        let mut worklist: VecDeque<(Place, Place)> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].clone(),
                    self.graph[edge.target()].clone(),
                )
            })
            .collect();
        let mut fuel = 10_000usize;
        while let Some((a, b)) = worklist.pop_front() {
            fuel -= 1;
            if fuel == 0 {
                warn!("line reconciliation did not stabilize, giving up");
                break;
            }
            let (Some(&ai), Some(&bi)) = (self.index.get(&a), self.index.get(&b)) else {
                continue;
            };
            let Some(edge) = self.graph.find_edge(ai, bi) else {
                continue;
            };
            let Some(mid) = intermediate_station(mirror, graphs, stations, &a, &b) else {
                continue;
            };
            let Some(stats) = self.graph.remove_edge(edge) else {
                continue;
            };
            let half = stats.halved();
            self.merge_section(a.clone(), mid.clone(), &half);
            self.merge_section(mid.clone(), b.clone(), &half);
            worklist.push_back((a, mid.clone()));
            worklist.push_back((mid, b));
        }
    }

    /// Remove the long chord of each cycle where one section's minimum
    /// travel time exceeds the rest of the ring minus one minute per hop;
    /// such a section is a through-run that skipped the intermediate stops,
    /// not a real parallel route. Cycles without such a chord are genuine
    /// ring lines: reported and kept.
    pub fn break_cycles(&mut self) -> Vec<Vec<Place>> {
        let mut kept = Vec::new();
        let mut kept_keys: HashSet<Vec<NodeIndex>> = HashSet::new();
        'rescan: loop {
            for cycle in self.cycle_basis() {
                let mut key = cycle.clone();
                key.sort();
                if kept_keys.contains(&key) {
                    continue;
                }
                let Some(edges) = self.cycle_edges(&cycle) else {
                    continue;
                };
                let hops = edges.len() as f64;
                let total: f64 = edges.iter().map(|(_, t)| t).sum();
                let Some(&(chord, t)) = edges.iter().max_by(|x, y| x.1.total_cmp(&y.1)) else {
                    continue;
                };
                if t > (total - t) - hops {
                    self.graph.remove_edge(chord);
                    continue 'rescan;
                }
                let names: Vec<&str> = cycle.iter().map(|&i| self.graph[i].name.as_str()).collect();
                warn!(?names, "keeping line cycle without a clear chord");
                kept_keys.insert(key);
                kept.push(cycle.iter().map(|&i| self.graph[i].clone()).collect());
            }
            break;
        }
        kept
    }

    fn ensure(&mut self, place: &Place) -> NodeIndex {
        if let Some(idx) = self.index.get(place) {
            return *idx;
        }
        let idx = self.graph.add_node(place.clone());
        self.index.insert(place.clone(), idx);
        idx
    }

    fn merge_section(&mut self, a: Place, b: Place, stats: &LineStats) {
        let (ai, bi) = (self.ensure(&a), self.ensure(&b));
        match self.graph.find_edge(ai, bi) {
            Some(edge) => {
                if let Some(existing) = self.graph.edge_weight_mut(edge) {
                    existing.merge(stats);
                }
            }
            None => {
                self.graph.add_edge(ai, bi, *stats);
            }
        }
    }

    /// Fundamental cycles of the current graph: a breadth-first spanning
    /// forest plus one ring per non-tree edge.
    fn cycle_basis(&self) -> Vec<Vec<NodeIndex>> {
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut tree_edges: HashSet<EdgeIndex> = HashSet::new();
        for root in self.graph.node_indices() {
            if depth.contains_key(&root) {
                continue;
            }
            depth.insert(root, 0);
            let mut queue = VecDeque::from([root]);
            while let Some(idx) = queue.pop_front() {
                for edge in self.graph.edges(idx) {
                    let next = edge.target();
                    if depth.contains_key(&next) {
                        continue;
                    }
                    depth.insert(next, depth[&idx] + 1);
                    parent.insert(next, idx);
                    tree_edges.insert(edge.id());
                    queue.push_back(next);
                }
            }
        }
        self.graph
            .edge_references()
            .filter(|edge| !tree_edges.contains(&edge.id()) && edge.source() != edge.target())
            .map(|edge| ring(edge.source(), edge.target(), &parent, &depth))
            .collect()
    }

    /// The edges along a ring, with each section's minimum travel time.
    /// `None` when the ring references an edge a previous removal took out.
    fn cycle_edges(&self, cycle: &[NodeIndex]) -> Option<Vec<(EdgeIndex, f64)>> {
        let mut out = Vec::with_capacity(cycle.len());
        for i in 0..cycle.len() {
            let a = cycle[i];
            let b = cycle[(i + 1) % cycle.len()];
            let edge = self.graph.find_edge(a, b)?;
            out.push((edge, self.graph.edge_weight(edge)?.min));
        }
        Some(out)
    }
}

/// Ring closed by the non-tree edge (u, v): u up to the lowest common
/// ancestor, then back down to v.
fn ring(
    u: NodeIndex,
    v: NodeIndex,
    parent: &HashMap<NodeIndex, NodeIndex>,
    depth: &HashMap<NodeIndex, usize>,
) -> Vec<NodeIndex> {
    let (mut a, mut b) = (u, v);
    let mut a_path = vec![a];
    let mut b_path = vec![b];
    while depth[&a] > depth[&b] {
        a = parent[&a];
        a_path.push(a);
    }
    while depth[&b] > depth[&a] {
        b = parent[&b];
        b_path.push(b);
    }
    while a != b {
        a = parent[&a];
        a_path.push(a);
        b = parent[&b];
        b_path.push(b);
    }
    b_path.pop();
    b_path.reverse();
    a_path.extend(b_path);
    a_path
}

fn intermediate_station(
    mirror: &Mirror,
    graphs: &GraphSet,
    stations: &mut StationGraph,
    a: &Place,
    b: &Place,
) -> Option<Place> {
    let start = representative(mirror, graphs, stations, a)?;
    let goal = representative(mirror, graphs, stations, b)?;
    let path = shortest_topo_path(graphs, start, goal)?;
    for &idx in path.get(1..path.len().saturating_sub(1))? {
        let node = &graphs.topology()[idx];
        if !matches!(node.kind, NodeKind::Platform | NodeKind::Waypoint) {
            continue;
        }
        let Some(name) = mirror.node(&node.key).and_then(|n| n.name.clone()) else {
            continue;
        };
        let station = match stations.superior_of_name(&name).cloned() {
            Some(station) => station,
            None => {
                let derived = Place::station(name_prefix(&name));
                stations.assign(derived.clone(), Place::platform(&name));
                derived
            }
        };
        if station != *a && station != *b {
            return Some(station);
        }
    }
    None
}

/// Any track node belonging to one of the station's platforms or access
/// tracks.
fn representative(
    mirror: &Mirror,
    graphs: &GraphSet,
    stations: &StationGraph,
    station: &Place,
) -> Option<petgraph::graph::NodeIndex> {
    stations
        .list_children(station, &[PlaceKind::Platform, PlaceKind::AccessTrack])
        .into_iter()
        .find_map(|child| {
            let node = mirror.node_by_name(&child.name)?;
            graphs.topo_node(&node.key)
        })
}

fn shortest_topo_path(
    graphs: &GraphSet,
    start: petgraph::graph::NodeIndex,
    goal: petgraph::graph::NodeIndex,
) -> Option<Vec<petgraph::graph::NodeIndex>> {
    let topo = graphs.topology();
    let mut prev: HashMap<_, _> = HashMap::new();
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(idx) = queue.pop_front() {
        if idx == goal {
            let mut path = vec![goal];
            let mut cursor = goal;
            while let Some(&p) = prev.get(&cursor) {
                path.push(p);
                cursor = p;
            }
            path.reverse();
            return Some(path);
        }
        for next in topo.neighbors_undirected(idx) {
            if seen.insert(next) {
                prev.insert(next, idx);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    use stellwerk_proto::{PlatformInfo, TimetableRow, TrackConnector, TrackNode, TrainId};
    use stellwerk_proto::messages::ConnectorEnd;

    use crate::config::Grouping;

    fn station(name: &str) -> Place {
        Place::station(name)
    }

    #[test]
    fn test_halved_stats_conserve_the_mean() {
        let mut stats = LineStats::new(9.0);
        stats.record(11.0);
        let half = stats.halved();
        assert_eq!(half.count, stats.count);
        assert_relative_eq!(half.mean() * 2.0, stats.mean());
        assert_relative_eq!(half.min, 4.5);
    }

    #[test]
    fn test_chord_cycle_is_broken() {
        let mut lines = LineGraph::new();
        lines.record_travel(station("S1"), station("S2"), 10.0);
        lines.record_travel(station("S2"), station("S3"), 3.0);
        lines.record_travel(station("S3"), station("S1"), 3.0);

        let kept = lines.break_cycles();
        assert!(kept.is_empty());
        assert_eq!(lines.edge_count(), 2);
        assert!(lines.stats_between(&station("S1"), &station("S2")).is_none());
    }

    #[test]
    fn test_symmetric_cycle_is_kept_and_reported() {
        let mut lines = LineGraph::new();
        lines.record_travel(station("S1"), station("S2"), 5.0);
        lines.record_travel(station("S2"), station("S3"), 5.0);
        lines.record_travel(station("S3"), station("S1"), 5.0);

        let kept = lines.break_cycles();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].len(), 3);
        assert_eq!(lines.edge_count(), 3);
    }

    fn planned_run_setup() -> (Mirror, GraphSet, StationGraph) {
        let mut mirror = Mirror::new();
        mirror.apply_platform_list(vec![
            PlatformInfo { name: "A 1".into(), is_halt: false, neighbors: vec![] },
            PlatformInfo { name: "M 1".into(), is_halt: true, neighbors: vec![] },
            PlatformInfo { name: "B 1".into(), is_halt: false, neighbors: vec![] },
        ]);
        mirror.apply_node_list(
            vec![
                TrackNode { id: None, name: Some("A 1".into()), kind: NodeKind::Platform },
                TrackNode { id: None, name: Some("M 1".into()), kind: NodeKind::Platform },
                TrackNode { id: None, name: Some("B 1".into()), kind: NodeKind::Platform },
            ],
            vec![
                TrackConnector {
                    a: ConnectorEnd::Name("A 1".into()),
                    b: ConnectorEnd::Name("M 1".into()),
                },
                TrackConnector {
                    a: ConnectorEnd::Name("M 1".into()),
                    b: ConnectorEnd::Name("B 1".into()),
                },
            ],
        );
        mirror.apply_train_schedule(
            TrainId(1),
            vec![
                TimetableRow {
                    platform: "A 1".into(),
                    planned_platform: "A 1".into(),
                    arrival: Some(595),
                    departure: Some(600),
                    flags: String::new(),
                },
                TimetableRow {
                    platform: "B 1".into(),
                    planned_platform: "B 1".into(),
                    arrival: Some(620),
                    departure: None,
                    flags: String::new(),
                },
            ],
        );
        let mut graphs = GraphSet::new();
        graphs.sync_topology(&mirror);
        graphs.sync_schedule(&mirror, TrainId(1));

        let grouping = Grouping {
            assignments: HashMap::from([
                ("A 1".to_string(), "Alpha".to_string()),
                ("B 1".to_string(), "Beta".to_string()),
            ]),
            connections: HashMap::new(),
        };
        let stations = StationGraph::from_mirror(&mirror, &grouping);
        (mirror, graphs, stations)
    }

    #[test]
    fn test_build_skips_same_station_runs() {
        let (mut mirror, mut graphs, _) = planned_run_setup();
        // A second train shunting inside Alpha only.
        mirror.apply_train_schedule(
            TrainId(2),
            vec![
                TimetableRow {
                    platform: "A 1".into(),
                    planned_platform: "A 1".into(),
                    arrival: Some(100),
                    departure: Some(105),
                    flags: String::new(),
                },
                TimetableRow {
                    platform: "A 1".into(),
                    planned_platform: "A 1".into(),
                    arrival: Some(110),
                    departure: None,
                    flags: String::new(),
                },
            ],
        );
        graphs.sync_schedule(&mirror, TrainId(2));

        let grouping = Grouping {
            assignments: HashMap::from([
                ("A 1".to_string(), "Alpha".to_string()),
                ("B 1".to_string(), "Beta".to_string()),
            ]),
            connections: HashMap::new(),
        };
        let stations = StationGraph::from_mirror(&mirror, &grouping);
        let lines = LineGraph::build(&graphs, &stations);
        assert_eq!(lines.edge_count(), 1);
        let stats = lines.stats_between(&station("Alpha"), &station("Beta")).unwrap();
        assert_relative_eq!(stats.mean(), 20.0);
    }

    #[test]
    fn test_reconcile_subdivides_through_stations() {
        let (mirror, graphs, mut stations) = planned_run_setup();
        let mut lines = LineGraph::build(&graphs, &stations);
        assert_eq!(lines.edge_count(), 1);

        lines.reconcile(&mirror, &graphs, &mut stations);

        assert_eq!(lines.edge_count(), 2);
        assert!(lines.stats_between(&station("Alpha"), &station("Beta")).is_none());
        let left = lines.stats_between(&station("Alpha"), &station("M")).unwrap();
        let right = lines.stats_between(&station("M"), &station("Beta")).unwrap();
        // Subdivision conserves the end-to-end mean.
        assert_relative_eq!(left.mean() + right.mean(), 20.0);
    }
}
