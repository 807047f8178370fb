//! # stellwerk-dispo
//!
//! Dispatch-side reduction of the live state: platforms grouped into
//! stations, a between-stations line graph with travel-time statistics, and
//! an occupancy slot model for platform/entry/exit boards. Everything here
//! reads the mirror and graphs of `stellwerk-client`; nothing talks to the
//! simulator directly.

pub mod config;
pub mod lines;
pub mod slots;
pub mod station;

pub use config::{ConfigError, Grouping, GroupingStore};
pub use lines::{LineGraph, LineStats};
pub use slots::{
    ArrivalBoard, DepartureBoard, Occupancy, OccupancyModel, PlatformBoard, Slot, SlotKey,
};
pub use station::{Place, PlaceKind, StationGraph};
