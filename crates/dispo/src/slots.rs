//! Occupancy slots: who claims which platform when.
//!
//! A slot is identified by (train, platform); rebuilding the same board
//! replaces slots in place instead of stacking duplicates. Conflict
//! resolution only annotates, it never deletes a slot: the boards show the
//! dispatcher the collision, they do not decide it.

use std::collections::HashMap;

use stellwerk_client::Mirror;
use stellwerk_proto::{TrainId, TrainLink};

pub type SlotKey = (TrainId, String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub train: TrainId,
    pub train_name: String,
    pub platform: String,
    /// Minutes since midnight.
    pub start: i32,
    pub duration: i32,
    pub passes_through: bool,
    pub coupled_with: Option<TrainId>,
    pub conflicts: Vec<SlotKey>,
}

impl Slot {
    pub fn key(&self) -> SlotKey {
        (self.train, self.platform.clone())
    }

    pub fn end(&self) -> i32 {
        self.start + self.duration
    }

    /// Same platform and touching or overlapping intervals. Touching
    /// counts: an arrival in the departure minute of another train is a
    /// conflict the dispatcher wants to see.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.platform == other.platform
            && self.start <= other.end()
            && other.start <= self.end()
    }
}

/// One board's way of turning the mirror into slots and annotating their
/// conflicts. `resolve_conflicts` may reorder and annotate, never delete.
pub trait OccupancyModel {
    fn build_slots(&self, mirror: &Mirror) -> Vec<Slot>;

    fn resolve_conflicts(&self, slots: &mut [Slot]) {
        mark_overlaps(slots);
    }
}

/// Mark every overlapping same-platform pair on both slots. Pairs planned
/// to couple occupy the platform together and are exempt; one side
/// carrying the coupling flag is enough.
pub fn mark_overlaps(slots: &mut [Slot]) {
    for slot in slots.iter_mut() {
        slot.conflicts.clear();
    }
    for i in 0..slots.len() {
        for j in (i + 1)..slots.len() {
            if !slots[i].overlaps(&slots[j]) {
                continue;
            }
            let coupled = slots[i].coupled_with == Some(slots[j].train)
                || slots[j].coupled_with == Some(slots[i].train);
            if coupled {
                continue;
            }
            let key_i = slots[i].key();
            let key_j = slots[j].key();
            slots[i].conflicts.push(key_j);
            slots[j].conflicts.push(key_i);
        }
    }
}

/// Platform occupancy: one slot per scheduled stop of every live train.
pub struct PlatformBoard;

impl OccupancyModel for PlatformBoard {
    fn build_slots(&self, mirror: &Mirror) -> Vec<Slot> {
        let mut out = Vec::new();
        for train in mirror.live_trains() {
            for entry in &train.schedule {
                let Some(start) = entry.arrival.or(entry.departure) else {
                    continue;
                };
                let duration = if entry.passes_through {
                    0
                } else {
                    match (entry.arrival, entry.departure) {
                        (Some(arrival), Some(departure)) => (departure - arrival).max(0),
                        _ => 0,
                    }
                };
                let coupled_with = match entry.link {
                    Some(TrainLink::Coupling(partner)) => Some(partner),
                    _ => None,
                };
                out.push(Slot {
                    train: train.id,
                    train_name: train.name.clone(),
                    platform: entry.planned_platform.clone(),
                    start,
                    duration,
                    passes_through: entry.passes_through,
                    coupled_with,
                    conflicts: Vec::new(),
                });
            }
        }
        out
    }
}

/// Arrival board: one fixed one-minute slot per live train on its entry
/// track, at the time of its first scheduled stop.
pub struct ArrivalBoard;

impl OccupancyModel for ArrivalBoard {
    fn build_slots(&self, mirror: &Mirror) -> Vec<Slot> {
        mirror
            .live_trains()
            .filter_map(|train| {
                let origin = train.origin.clone()?;
                let first = train.schedule.first()?;
                let start = first.arrival.or(first.departure)?;
                Some(Slot {
                    train: train.id,
                    train_name: train.name.clone(),
                    platform: origin,
                    start,
                    duration: 1,
                    passes_through: false,
                    coupled_with: None,
                    conflicts: Vec::new(),
                })
            })
            .collect()
    }
}

/// Departure board: the exit-track counterpart of [`ArrivalBoard`].
pub struct DepartureBoard;

impl OccupancyModel for DepartureBoard {
    fn build_slots(&self, mirror: &Mirror) -> Vec<Slot> {
        mirror
            .live_trains()
            .filter_map(|train| {
                let destination = train.destination.clone()?;
                let last = train.schedule.last()?;
                let start = last.departure.or(last.arrival)?;
                Some(Slot {
                    train: train.id,
                    train_name: train.name.clone(),
                    platform: destination,
                    start,
                    duration: 1,
                    passes_through: false,
                    coupled_with: None,
                    conflicts: Vec::new(),
                })
            })
            .collect()
    }
}

/// Slot container driving the build/resolve pipeline of any board and
/// deduplicating by slot identity: a later build of the same (train,
/// platform) replaces the earlier slot.
#[derive(Debug, Default)]
pub struct Occupancy {
    slots: HashMap<SlotKey, Slot>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, model: &dyn OccupancyModel, mirror: &Mirror) {
        let mut fresh = model.build_slots(mirror);
        model.resolve_conflicts(&mut fresh);
        for slot in fresh {
            self.slots.insert(slot.key(), slot);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, key: &SlotKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    /// Slots of one platform, in start order.
    pub fn platform_slots(&self, platform: &str) -> Vec<&Slot> {
        let mut out: Vec<&Slot> = self
            .slots
            .values()
            .filter(|s| s.platform == platform)
            .collect();
        out.sort_by_key(|s| (s.start, s.train));
        out
    }
}
