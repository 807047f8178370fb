//! # stellwerk-client
//!
//! Live-state client for the train-dispatch simulator: one stateful TCP
//! connection, a mirror of the simulator's platform/topology/train tables,
//! and four derived graphs kept in step with the mirror.
//!
//! Data flows one way: [`transport`] parses wire documents, [`Client`]
//! applies them to the [`mirror`], and the [`graphs`] synthesizer folds the
//! mirror into topology, platform, train and schedule graphs. Downstream
//! consumers (reduction, occupancy analysis) read the graphs; nothing here
//! renders or persists anything.

pub mod client;
pub mod clock;
pub mod graphs;
pub mod mirror;
pub mod transport;

pub use client::{Client, Registration};
pub use clock::SimClock;
pub use graphs::GraphSet;
pub use mirror::{Mirror, Node, Platform, ScheduleEntry, Train};
pub use transport::Transport;
