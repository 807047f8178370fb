//! Station grouping: a hierarchy of typed place labels over the raw
//! platform and access-track names.
//!
//! Stations own platforms, connections own access tracks. The hierarchy is
//! supplied by the grouping configuration; platforms without an assignment
//! get a derived station name from their interlocking group, so the
//! reducer always has a complete (if rough) grouping to work with.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::OnceLock;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use regex::Regex;

use stellwerk_client::Mirror;
use stellwerk_proto::NodeKind;

use crate::config::Grouping;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaceKind {
    Station,
    Connection,
    Platform,
    AccessTrack,
}

/// A typed label in the grouping hierarchy. Two places are the same node
/// iff kind and name both match; a station and a platform may share a name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Place {
    pub kind: PlaceKind,
    pub name: String,
}

impl Place {
    pub fn station(name: impl Into<String>) -> Self {
        Self { kind: PlaceKind::Station, name: name.into() }
    }

    pub fn connection(name: impl Into<String>) -> Self {
        Self { kind: PlaceKind::Connection, name: name.into() }
    }

    pub fn platform(name: impl Into<String>) -> Self {
        Self { kind: PlaceKind::Platform, name: name.into() }
    }

    pub fn access_track(name: impl Into<String>) -> Self {
        Self { kind: PlaceKind::AccessTrack, name: name.into() }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parent-to-child hierarchy of places.
#[derive(Debug, Default)]
pub struct StationGraph {
    graph: DiGraph<Place, ()>,
    index: HashMap<Place, NodeIndex>,
}

impl StationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the hierarchy for a facility: configured assignments first,
    /// derived station names for the leftovers, connections for every
    /// entry/exit node.
    pub fn from_mirror(mirror: &Mirror, grouping: &Grouping) -> Self {
        let mut stations = Self::new();

        let mut unassigned: Vec<&str> = Vec::new();
        for platform in mirror.platforms() {
            match grouping.assignments.get(&platform.name) {
                Some(station) => {
                    stations.assign(Place::station(station), Place::platform(&platform.name));
                }
                None => unassigned.push(&platform.name),
            }
        }

        // Leftover platforms are grouped by their interlocking neighborhood
        // and named by the common prefix of the group.
        for component in neighbor_components(mirror, &unassigned) {
            let name = derived_station_name(&component);
            for platform in component {
                stations.assign(Place::station(name.clone()), Place::platform(platform));
            }
        }

        for node in mirror.nodes() {
            if !matches!(node.kind, NodeKind::Entry | NodeKind::Exit) {
                continue;
            }
            let Some(name) = &node.name else { continue };
            let parent = grouping
                .connections
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.clone());
            stations.assign(Place::connection(parent), Place::access_track(name));
        }

        stations
    }

    pub fn contains(&self, place: &Place) -> bool {
        self.index.contains_key(place)
    }

    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.graph.node_weights()
    }

    fn ensure(&mut self, place: &Place) -> NodeIndex {
        if let Some(idx) = self.index.get(place) {
            return *idx;
        }
        let idx = self.graph.add_node(place.clone());
        self.index.insert(place.clone(), idx);
        idx
    }

    /// Record `child` as belonging to `parent`.
    pub fn assign(&mut self, parent: Place, child: Place) {
        let parent = self.ensure(&parent);
        let child = self.ensure(&child);
        if self.graph.find_edge(parent, child).is_none() {
            self.graph.add_edge(parent, child, ());
        }
    }

    /// Walk up from `place` until a place of an allowed kind is found; a
    /// place that is itself of an allowed kind is its own superior.
    pub fn find_superior(&self, place: &Place, allowed: &[PlaceKind]) -> Option<&Place> {
        let mut idx = *self.index.get(place)?;
        loop {
            let current = &self.graph[idx];
            if allowed.contains(&current.kind) {
                return Some(current);
            }
            idx = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .next()?;
        }
    }

    /// All descendants of `place` whose kind is allowed, in no particular
    /// order.
    pub fn list_children(&self, place: &Place, allowed: &[PlaceKind]) -> Vec<&Place> {
        let Some(&start) = self.index.get(place) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);
        while let Some(idx) = queue.pop_front() {
            for child in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if !seen.insert(child) {
                    continue;
                }
                let place = &self.graph[child];
                if allowed.contains(&place.kind) {
                    out.push(place);
                }
                queue.push_back(child);
            }
        }
        out
    }

    /// Superior station or connection of a platform or access-track name.
    pub fn superior_of_name(&self, name: &str) -> Option<&Place> {
        let allowed = [PlaceKind::Station, PlaceKind::Connection];
        self.find_superior(&Place::platform(name), &allowed)
            .or_else(|| self.find_superior(&Place::access_track(name), &allowed))
    }
}

/// Leading non-digit part of a name, used as a fallback station label.
pub(crate) fn name_prefix(name: &str) -> &str {
    static PREFIX_RE: OnceLock<Regex> = OnceLock::new();
    let re = PREFIX_RE.get_or_init(|| Regex::new(r"^\D+").expect("static regex"));
    re.find(name)
        .map(|m| m.as_str().trim_end())
        .filter(|p| !p.is_empty())
        .unwrap_or(name)
}

fn neighbor_components<'a>(mirror: &Mirror, names: &[&'a str]) -> Vec<Vec<&'a str>> {
    let pool: HashSet<&str> = names.iter().copied().collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut components = Vec::new();
    for &name in names {
        if seen.contains(name) {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::from([name]);
        seen.insert(name);
        while let Some(current) = queue.pop_front() {
            component.push(current);
            let Some(platform) = mirror.platform(current) else {
                continue;
            };
            for neighbor in &platform.neighbors {
                if let Some(&next) = pool.get(neighbor.as_str()) {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        component.sort();
        components.push(component);
    }
    components
}

fn derived_station_name(names: &[&str]) -> String {
    let Some(first) = names.first() else {
        return String::new();
    };
    let mut prefix = first.to_string();
    for name in &names[1..] {
        let common = prefix
            .chars()
            .zip(name.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect();
        prefix = common;
    }
    let trimmed = prefix
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end();
    if trimmed.is_empty() {
        name_prefix(first).to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stellwerk_proto::PlatformInfo;

    fn mirror_with_platforms(platforms: &[(&str, &[&str])]) -> Mirror {
        let mut mirror = Mirror::new();
        mirror.apply_platform_list(
            platforms
                .iter()
                .map(|(name, neighbors)| PlatformInfo {
                    name: name.to_string(),
                    is_halt: false,
                    neighbors: neighbors.iter().map(|n| n.to_string()).collect(),
                })
                .collect(),
        );
        mirror
    }

    #[test]
    fn test_superior_walk_and_self() {
        let mut stations = StationGraph::new();
        stations.assign(Place::station("Westdorf"), Place::platform("A 1"));

        let allowed = [PlaceKind::Station];
        assert_eq!(
            stations.find_superior(&Place::platform("A 1"), &allowed),
            Some(&Place::station("Westdorf"))
        );
        assert_eq!(
            stations.find_superior(&Place::station("Westdorf"), &allowed),
            Some(&Place::station("Westdorf"))
        );
        assert_eq!(stations.find_superior(&Place::platform("B 1"), &allowed), None);
    }

    #[test]
    fn test_list_children() {
        let mut stations = StationGraph::new();
        stations.assign(Place::station("Westdorf"), Place::platform("A 1"));
        stations.assign(Place::station("Westdorf"), Place::platform("A 2"));
        stations.assign(Place::connection("West"), Place::access_track("W"));

        let mut children: Vec<String> = stations
            .list_children(&Place::station("Westdorf"), &[PlaceKind::Platform])
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        children.sort();
        assert_eq!(children, vec!["A 1", "A 2"]);
    }

    #[test]
    fn test_configured_assignment_wins() {
        let mirror = mirror_with_platforms(&[("A 1", &["A 2"]), ("A 2", &[])]);
        let grouping = Grouping {
            assignments: HashMap::from([("A 1".to_string(), "Hauptbahnhof".to_string())]),
            connections: HashMap::new(),
        };
        let stations = StationGraph::from_mirror(&mirror, &grouping);

        assert_eq!(
            stations.superior_of_name("A 1"),
            Some(&Place::station("Hauptbahnhof"))
        );
        // A 2 had no assignment and stands alone in the leftover pool.
        assert_eq!(stations.superior_of_name("A 2"), Some(&Place::station("A")));
    }

    #[test]
    fn test_derived_names_follow_neighborhood() {
        let mirror = mirror_with_platforms(&[
            ("A 1", &["A 2"]),
            ("A 2", &[]),
            ("B 7", &[]),
        ]);
        let stations = StationGraph::from_mirror(&mirror, &Grouping::default());

        assert_eq!(stations.superior_of_name("A 1"), Some(&Place::station("A")));
        assert_eq!(stations.superior_of_name("A 2"), Some(&Place::station("A")));
        assert_eq!(stations.superior_of_name("B 7"), Some(&Place::station("B")));
    }

    #[test]
    fn test_name_prefix() {
        assert_eq!(name_prefix("Abzw 13"), "Abzw");
        assert_eq!(name_prefix("12"), "12");
    }
}
