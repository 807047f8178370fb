//! Schema-validated message types, one per response tag.
//!
//! Every response family gets an explicit record type with declared
//! required/optional fields, so that a missing attribute is a typed error
//! at the parse boundary instead of a silent hole downstream.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::identifiers::{NodeKey, TrainId};
use crate::record::Document;

/// Plugin protocol revision sent during registration.
pub const PROTOCOL_VERSION: &str = "1";

// ============================================================================
// Enumerations
// ============================================================================

/// Topology node types as numbered on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Signal,
    PointsLower,
    PointsUpper,
    Platform,
    Entry,
    Exit,
    /// Stop point without a full platform ("Haltepunkt").
    Waypoint,
    Other(u8),
}

impl NodeKind {
    pub fn from_wire(value: u8) -> Self {
        match value {
            2 => Self::Signal,
            3 => Self::PointsLower,
            4 => Self::PointsUpper,
            5 => Self::Platform,
            6 => Self::Entry,
            7 => Self::Exit,
            12 => Self::Waypoint,
            other => Self::Other(other),
        }
    }

    pub fn wire(&self) -> u8 {
        match self {
            Self::Signal => 2,
            Self::PointsLower => 3,
            Self::PointsUpper => 4,
            Self::Platform => 5,
            Self::Entry => 6,
            Self::Exit => 7,
            Self::Waypoint => 12,
            Self::Other(other) => *other,
        }
    }
}

/// Unsolicited event kinds, fixed wire strings.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum EventKind {
    #[strum(serialize = "einfahrt")]
    Entry,
    #[strum(serialize = "ankunft")]
    Arrival,
    #[strum(serialize = "abfahrt")]
    Departure,
    #[strum(serialize = "ausfahrt")]
    Exit,
    #[strum(serialize = "rothalt")]
    RedStop,
    #[strum(serialize = "wurdegruen")]
    ClearedSignal,
    #[strum(serialize = "kuppeln")]
    Coupling,
    #[strum(serialize = "fluegeln")]
    Splitting,
}

/// Planned relationship between two trains, parsed from timetable flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrainLink {
    /// This train continues as another one ("E").
    Replacement(TrainId),
    /// Another train couples onto this one at the same platform ("K").
    Coupling(TrainId),
    /// A section detaches and continues as another train ("F").
    Splitting(TrainId),
}

impl TrainLink {
    pub fn target(&self) -> TrainId {
        match self {
            Self::Replacement(id) | Self::Coupling(id) | Self::Splitting(id) => *id,
        }
    }
}

// ============================================================================
// Response records
// ============================================================================

/// `<status code='…'>text</status>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub text: String,
}

impl Status {
    pub const TAG: &'static str = "status";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Ok(Self {
            code: doc.int_attr(Self::TAG, "code")?,
            text: doc.text.trim().to_string(),
        })
    }

    /// Codes in [300, 400) keep the session alive but deserve a warning.
    pub fn is_warning(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Codes >= 400 are fatal during the handshake.
    pub fn is_fatal(&self) -> bool {
        self.code >= 400
    }
}

/// `<anlageninfo …/>`: static facility metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacilityInfo {
    pub aid: u32,
    pub name: String,
    pub build: u32,
    pub region: String,
    pub online: bool,
}

impl FacilityInfo {
    pub const TAG: &'static str = "anlageninfo";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Ok(Self {
            aid: doc.int_attr(Self::TAG, "aid")?,
            name: doc.req_attr(Self::TAG, "name")?.to_string(),
            build: doc.int_attr(Self::TAG, "simbuild")?,
            region: doc.attr("region").unwrap_or_default().to_string(),
            online: doc.bool_attr("online"),
        })
    }
}

/// One `<bahnsteig>` row of the platform list, with its `<n>` neighbors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub is_halt: bool,
    pub neighbors: Vec<String>,
}

impl PlatformInfo {
    pub const LIST_TAG: &'static str = "bahnsteigliste";
    pub const TAG: &'static str = "bahnsteig";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        let mut neighbors: Vec<String> = doc
            .children("n")
            .filter_map(|n| n.attr("name"))
            .map(str::to_string)
            .collect();
        neighbors.sort();
        Ok(Self {
            name: doc.req_attr(Self::TAG, "name")?.to_string(),
            is_halt: doc.bool_attr("haltepunkt"),
            neighbors,
        })
    }

    pub fn list_from_document(doc: &Document) -> Result<Vec<Self>> {
        let doc = doc.expect_tag(Self::LIST_TAG)?;
        doc.children(Self::TAG).map(Self::from_document).collect()
    }
}

/// One `<shape>` row of the topology list.
///
/// Some rows carry only a numeric element id, some only a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackNode {
    pub id: Option<u32>,
    pub name: Option<String>,
    pub kind: NodeKind,
}

impl TrackNode {
    pub const LIST_TAG: &'static str = "wege";
    pub const TAG: &'static str = "shape";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        let kind = doc
            .opt_int_attr::<u8>(Self::TAG, "type")?
            .map(NodeKind::from_wire)
            .unwrap_or(NodeKind::Other(0));
        Ok(Self {
            id: doc.opt_int_attr(Self::TAG, "enr")?,
            name: doc.attr("name").filter(|n| !n.is_empty()).map(str::to_string),
            kind,
        })
    }

    /// The numeric id wins where present; a row with neither id nor name
    /// cannot be keyed and is dropped by the mirror.
    pub fn key(&self) -> Option<NodeKey> {
        match (self.id, &self.name) {
            (Some(id), _) => Some(NodeKey::Id(id)),
            (None, Some(name)) => Some(NodeKey::Name(name.clone())),
            (None, None) => None,
        }
    }
}

/// One end of a `<connector>` row, referenced by id or name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectorEnd {
    Id(u32),
    Name(String),
}

/// Pairwise neighbor record following the node list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackConnector {
    pub a: ConnectorEnd,
    pub b: ConnectorEnd,
}

impl TrackConnector {
    pub const TAG: &'static str = "connector";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Ok(Self {
            a: Self::end(doc, "enr1", "name1")?,
            b: Self::end(doc, "enr2", "name2")?,
        })
    }

    fn end(doc: &Document, id_attr: &'static str, name_attr: &'static str) -> Result<ConnectorEnd> {
        if let Some(id) = doc.opt_int_attr::<u32>(Self::TAG, id_attr)? {
            return Ok(ConnectorEnd::Id(id));
        }
        match doc.attr(name_attr) {
            Some(name) if !name.is_empty() => Ok(ConnectorEnd::Name(name.to_string())),
            _ => Err(Error::MissingAttribute {
                tag: Self::TAG,
                attr: name_attr,
            }),
        }
    }
}

/// One `<zug>` row of the train roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainHeader {
    pub id: TrainId,
    pub name: String,
}

impl TrainHeader {
    pub const LIST_TAG: &'static str = "zugliste";
    pub const TAG: &'static str = "zug";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Ok(Self {
            id: TrainId(doc.int_attr(Self::TAG, "zid")?),
            name: doc.req_attr(Self::TAG, "name")?.to_string(),
        })
    }

    pub fn list_from_document(doc: &Document) -> Result<Vec<Self>> {
        let doc = doc.expect_tag(Self::LIST_TAG)?;
        doc.children(Self::TAG).map(Self::from_document).collect()
    }
}

/// `<zugdetails …/>`: full state of one train.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrainDetails {
    pub id: TrainId,
    pub name: String,
    /// Signed delay in minutes.
    pub delay: i32,
    pub platform: String,
    pub planned_platform: String,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub visible: bool,
    pub at_platform: bool,
}

impl TrainDetails {
    pub const TAG: &'static str = "zugdetails";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Self::from_element(doc, Self::TAG)
    }

    /// Shared with `Event`, whose tag carries the same attributes.
    fn from_element(doc: &Document, tag: &'static str) -> Result<Self> {
        Ok(Self {
            id: TrainId(doc.int_attr(tag, "zid")?),
            name: doc.req_attr(tag, "name")?.to_string(),
            delay: doc.opt_int_attr(tag, "verspaetung")?.unwrap_or(0),
            platform: doc.attr("gleis").unwrap_or_default().to_string(),
            planned_platform: doc.attr("plangleis").unwrap_or_default().to_string(),
            origin: doc.attr("von").filter(|v| !v.is_empty()).map(str::to_string),
            destination: doc.attr("nach").filter(|v| !v.is_empty()).map(str::to_string),
            visible: doc.bool_attr("sichtbar"),
            at_platform: doc.bool_attr("amgleis"),
        })
    }

    /// Category prefix of the display name, e.g. "ICE" in "ICE 723".
    pub fn category(&self) -> Option<&str> {
        let mut parts = self.name.split_whitespace();
        let first = parts.next()?;
        parts.next().map(|_| first)
    }

    /// Trailing numeric designator of the display name, e.g. 8376 in
    /// "S8 8376 RF". Unrelated to the train id.
    pub fn number(&self) -> u32 {
        let filtered: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_digit() { c } else { ' ' })
            .collect();
        filtered
            .split_whitespace()
            .last()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// One `<gleis>` row of a train's timetable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimetableRow {
    pub platform: String,
    pub planned_platform: String,
    /// Minutes since midnight; absent for open-ended entries.
    pub arrival: Option<i32>,
    pub departure: Option<i32>,
    pub flags: String,
}

impl TimetableRow {
    pub const LIST_TAG: &'static str = "zugfahrplan";
    pub const TAG: &'static str = "gleis";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Ok(Self {
            platform: doc.req_attr(Self::TAG, "name")?.to_string(),
            planned_platform: doc
                .attr("plan")
                .filter(|p| !p.is_empty())
                .unwrap_or(doc.req_attr(Self::TAG, "name")?)
                .to_string(),
            arrival: parse_clock(doc.attr("an")),
            departure: parse_clock(doc.attr("ab")),
            flags: doc.attr("flags").unwrap_or_default().to_string(),
        })
    }

    pub fn list_from_document(doc: &Document) -> Result<Vec<Self>> {
        let doc = doc.expect_tag(Self::LIST_TAG)?;
        doc.children(Self::TAG).map(Self::from_document).collect()
    }

    /// Pass-through without a stop ("D" flag).
    pub fn passes_through(&self) -> bool {
        self.flags.contains('D')
    }

    /// Direction change at this entry ("R" flag).
    pub fn changes_direction(&self) -> bool {
        self.flags.contains('R')
    }

    /// Departs ahead of schedule when ready ("A" flag).
    pub fn departs_early(&self) -> bool {
        self.flags.contains('A')
    }

    /// Forward link to another train, if any. Where several link flags are
    /// present, replacement wins over coupling over splitting.
    pub fn link(&self) -> Option<TrainLink> {
        self.link_id('E')
            .map(TrainLink::Replacement)
            .or_else(|| self.link_id('K').map(TrainLink::Coupling))
            .or_else(|| self.link_id('F').map(TrainLink::Splitting))
    }

    fn link_id(&self, flag: char) -> Option<TrainId> {
        static LINK_RE: OnceLock<Regex> = OnceLock::new();
        let re = LINK_RE.get_or_init(|| {
            Regex::new(r"([EFK])[0-9]?\(([0-9]+)\)").expect("static regex")
        });
        re.captures_iter(&self.flags)
            .find(|caps| caps[1].starts_with(flag))
            .and_then(|caps| caps[2].parse().ok())
            .map(TrainId)
    }
}

/// `<simzeit zeit='…'/>`: simulator clock in milliseconds since its origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimTime {
    pub millis: u64,
}

impl SimTime {
    pub const TAG: &'static str = "simzeit";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        Ok(Self {
            millis: doc.int_attr(Self::TAG, "zeit")?,
        })
    }
}

/// Unsolicited `<ereignis …/>` notification.
///
/// Carries the same attributes as `<zugdetails>` plus the event kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub train: TrainDetails,
}

impl Event {
    pub const TAG: &'static str = "ereignis";

    pub fn from_document(doc: &Document) -> Result<Self> {
        let doc = doc.expect_tag(Self::TAG)?;
        let raw_kind = doc.req_attr(Self::TAG, "art")?;
        let kind = raw_kind.parse().map_err(|_| Error::InvalidValue {
            tag: Self::TAG,
            attr: "art",
            value: raw_kind.to_string(),
        })?;
        Ok(Self {
            kind,
            train: TrainDetails::from_element(doc, Self::TAG)?,
        })
    }
}

/// Parse a wall-clock attribute ("HH:MM" or "HH:MM:SS") into minutes since
/// midnight. Unparseable values yield `None`; the schedule tolerates gaps.
fn parse_clock(value: Option<&str>) -> Option<i32> {
    let value = value?.trim();
    let mut parts = value.split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = parts.next()?.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::DocumentAssembler;

    fn parse(wire: &str) -> Document {
        let mut asm = DocumentAssembler::new();
        let mut doc = None;
        for line in wire.lines() {
            if let Some(complete) = asm.feed(line).unwrap() {
                doc = Some(complete);
            }
        }
        doc.expect("complete document")
    }

    #[test]
    fn test_status_levels() {
        let ok = Status::from_document(&parse("<status code='200'>ok</status>")).unwrap();
        assert!(!ok.is_warning() && !ok.is_fatal());

        let warn = Status::from_document(&parse("<status code='301'>old</status>")).unwrap();
        assert!(warn.is_warning() && !warn.is_fatal());

        let fatal = Status::from_document(&parse("<status code='450'>no</status>")).unwrap();
        assert!(fatal.is_fatal());
    }

    #[test]
    fn test_platform_list() {
        let doc = parse(
            "<bahnsteigliste>\n\
             <bahnsteig name='A 2' haltepunkt='false'><n name='A 1' /></bahnsteig>\n\
             <bahnsteig name='A 1' haltepunkt='true'><n name='A 2' /></bahnsteig>\n\
             </bahnsteigliste>",
        );
        let platforms = PlatformInfo::list_from_document(&doc).unwrap();
        assert_eq!(platforms.len(), 2);
        assert_eq!(platforms[0].name, "A 2");
        assert!(!platforms[0].is_halt);
        assert_eq!(platforms[0].neighbors, vec!["A 1".to_string()]);
        assert!(platforms[1].is_halt);
    }

    #[test]
    fn test_track_node_keys() {
        let both = TrackNode::from_document(&parse("<shape enr='12' name='X' type='2' />")).unwrap();
        assert_eq!(both.key(), Some(NodeKey::Id(12)));
        assert_eq!(both.kind, NodeKind::Signal);

        let named = TrackNode::from_document(&parse("<shape name='A 1' type='5' />")).unwrap();
        assert_eq!(named.key(), Some(NodeKey::Name("A 1".into())));

        let bare = TrackNode::from_document(&parse("<shape type='3' />")).unwrap();
        assert_eq!(bare.key(), None);
    }

    #[test]
    fn test_connector_ends() {
        let conn =
            TrackConnector::from_document(&parse("<connector enr1='3' name2='A 1' />")).unwrap();
        assert_eq!(conn.a, ConnectorEnd::Id(3));
        assert_eq!(conn.b, ConnectorEnd::Name("A 1".into()));

        assert!(TrackConnector::from_document(&parse("<connector enr1='3' />")).is_err());
    }

    #[test]
    fn test_train_details_and_name_parts() {
        let details = TrainDetails::from_document(&parse(
            "<zugdetails zid='365' name='S8 8376 RF' verspaetung='2' gleis='A 1' \
             plangleis='A 1' von='Westdorf' nach='' sichtbar='true' amgleis='false' />",
        ))
        .unwrap();
        assert_eq!(details.id, TrainId(365));
        assert_eq!(details.delay, 2);
        assert_eq!(details.origin.as_deref(), Some("Westdorf"));
        assert_eq!(details.destination, None);
        assert_eq!(details.category(), Some("S8"));
        assert_eq!(details.number(), 8376);
    }

    #[test]
    fn test_timetable_flags_and_times() {
        let row = TimetableRow::from_document(&parse(
            "<gleis name='B 3' plan='B 3' an='10:05' ab='10:07' flags='D K(2764)' />",
        ))
        .unwrap();
        assert_eq!(row.arrival, Some(605));
        assert_eq!(row.departure, Some(607));
        assert!(row.passes_through());
        assert_eq!(row.link(), Some(TrainLink::Coupling(TrainId(2764))));

        let replaced = TimetableRow::from_document(&parse(
            "<gleis name='B 3' an='' ab='xx' flags='E2(99) F(7)' />",
        ))
        .unwrap();
        assert_eq!(replaced.arrival, None);
        assert_eq!(replaced.departure, None);
        // Replacement takes precedence over the splitting flag.
        assert_eq!(replaced.link(), Some(TrainLink::Replacement(TrainId(99))));
        assert_eq!(replaced.planned_platform, "B 3");
    }

    #[test]
    fn test_event_parsing() {
        let event = Event::from_document(&parse(
            "<ereignis zid='1' art='einfahrt' name='RE 10' verspaetung='+2' gleis='1' \
             plangleis='1' von='A-Stadt' nach='B-Hausen' sichtbar='true' amgleis='true' />",
        ))
        .unwrap();
        assert_eq!(event.kind, EventKind::Entry);
        assert_eq!(event.train.name, "RE 10");
        assert_eq!(event.train.delay, 2);

        assert!(Event::from_document(&parse("<ereignis zid='1' art='explodiert' name='X' />")).is_err());
    }
}
