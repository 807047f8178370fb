//! # stellwerk-proto
//!
//! Wire protocol for the train-dispatch simulator plugin interface.
//!
//! The simulator speaks a line-oriented tagged-markup protocol over plain
//! TCP: requests are single self-closing records (`<tag attr='value' />`),
//! responses are small nested documents whose outermost tag names the data
//! family. This crate owns:
//!
//! - request serialization ([`record::request`])
//! - incremental assembly of response documents ([`assembler::DocumentAssembler`])
//! - one schema-validated message type per response tag ([`messages`])
//! - the shared error taxonomy ([`error::Error`])
//!
//! No I/O happens here; `stellwerk-client` drives the socket.

pub mod assembler;
pub mod error;
pub mod identifiers;
pub mod messages;
pub mod record;

pub use assembler::DocumentAssembler;
pub use error::{Error, Result};
pub use identifiers::{EntryKey, NodeKey, TrainId};
pub use messages::{
    Event, EventKind, FacilityInfo, NodeKind, PlatformInfo, SimTime, Status, TimetableRow,
    TrackConnector, TrackNode, TrainDetails, TrainHeader, TrainLink,
};
pub use record::Document;
