//! High-level session facade: one connection, the mirror behind it and the
//! graphs derived from the mirror, kept consistent by the refresh methods.

use std::time::Duration;

use tracing::instrument;

use stellwerk_proto::{
    Event, EventKind, FacilityInfo, PlatformInfo, Result, SimTime, TimetableRow, TrackConnector,
    TrackNode, TrainDetails, TrainHeader, TrainId,
};

use crate::clock::SimClock;
use crate::graphs::GraphSet;
use crate::mirror::Mirror;
use crate::transport::Transport;

pub use crate::transport::Registration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    transport: Transport,
    mirror: Mirror,
    graphs: GraphSet,
    clock: SimClock,
    timeout: Duration,
}

impl Client {
    /// Connect, register, and return an empty session. Nothing is fetched
    /// until the first refresh.
    pub async fn connect(host: &str, port: u16, registration: &Registration) -> Result<Self> {
        let transport = Transport::connect(host, port, registration).await?;
        Ok(Self {
            transport,
            mirror: Mirror::new(),
            graphs: GraphSet::new(),
            clock: SimClock::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Per-request response timeout; applies to every refresh.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn graphs(&self) -> &GraphSet {
        &self.graphs
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    #[instrument(skip(self))]
    pub async fn refresh_facility(&mut self) -> Result<()> {
        self.transport.send(FacilityInfo::TAG, &[]).await?;
        let doc = self
            .transport
            .await_tag(FacilityInfo::TAG, Some(self.timeout))
            .await?;
        self.mirror.set_facility(FacilityInfo::from_document(&doc)?);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn refresh_sim_time(&mut self) -> Result<()> {
        self.transport
            .send(SimTime::TAG, &[("sender", "0")])
            .await?;
        let doc = self
            .transport
            .await_tag(SimTime::TAG, Some(self.timeout))
            .await?;
        self.clock.update(&SimTime::from_document(&doc)?);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn refresh_platforms(&mut self) -> Result<()> {
        self.transport.send(PlatformInfo::LIST_TAG, &[]).await?;
        let doc = self
            .transport
            .await_tag(PlatformInfo::LIST_TAG, Some(self.timeout))
            .await?;
        self.mirror
            .apply_platform_list(PlatformInfo::list_from_document(&doc)?);
        self.graphs.sync_platforms(&self.mirror);
        Ok(())
    }

    /// Fetch the track layout: node rows and the connector rows that pair
    /// them up arrive in one response.
    #[instrument(skip(self))]
    pub async fn refresh_topology(&mut self) -> Result<()> {
        self.transport.send(TrackNode::LIST_TAG, &[]).await?;
        let doc = self
            .transport
            .await_tag(TrackNode::LIST_TAG, Some(self.timeout))
            .await?;
        let nodes: Vec<TrackNode> = doc
            .children(TrackNode::TAG)
            .map(TrackNode::from_document)
            .collect::<Result<_>>()?;
        let connectors: Vec<TrackConnector> = doc
            .children(TrackConnector::TAG)
            .map(TrackConnector::from_document)
            .collect::<Result<_>>()?;
        self.mirror.apply_node_list(nodes, connectors);
        self.graphs.sync_topology(&self.mirror);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn refresh_roster(&mut self) -> Result<()> {
        self.transport.send(TrainHeader::LIST_TAG, &[]).await?;
        let doc = self
            .transport
            .await_tag(TrainHeader::LIST_TAG, Some(self.timeout))
            .await?;
        self.mirror
            .apply_train_roster(TrainHeader::list_from_document(&doc)?);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn refresh_train_details(&mut self, id: TrainId) -> Result<()> {
        let zid = id.to_string();
        self.transport
            .send(TrainDetails::TAG, &[("zid", &zid)])
            .await?;
        let doc = self
            .transport
            .await_tag(TrainDetails::TAG, Some(self.timeout))
            .await?;
        self.mirror
            .apply_train_details(TrainDetails::from_document(&doc)?);
        self.graphs.sync_train(&self.mirror, id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn refresh_train_schedule(&mut self, id: TrainId) -> Result<()> {
        let zid = id.to_string();
        self.transport
            .send(TimetableRow::LIST_TAG, &[("zid", &zid)])
            .await?;
        let doc = self
            .transport
            .await_tag(TimetableRow::LIST_TAG, Some(self.timeout))
            .await?;
        self.mirror
            .apply_train_schedule(id, TimetableRow::list_from_document(&doc)?);
        self.graphs.sync_train(&self.mirror, id);
        self.graphs.sync_schedule(&self.mirror, id);
        Ok(())
    }

    /// Full refresh: static data, clock, roster, then details and schedule
    /// of every live train. Schedules are folded in a second pass so that
    /// cross-train link edges resolve within one call.
    #[instrument(skip(self))]
    pub async fn refresh_all(&mut self) -> Result<()> {
        self.refresh_facility().await?;
        self.refresh_sim_time().await?;
        self.refresh_platforms().await?;
        self.refresh_topology().await?;
        self.refresh_roster().await?;
        let live: Vec<TrainId> = self.mirror.live_trains().map(|t| t.id).collect();
        for id in &live {
            self.refresh_train_details(*id).await?;
        }
        for id in &live {
            self.refresh_train_schedule(*id).await?;
        }
        for id in live {
            self.graphs.sync_schedule(&self.mirror, id);
        }
        Ok(())
    }

    /// Subscribe to an event kind for every live train.
    pub async fn subscribe_live(&mut self, kind: EventKind) -> Result<()> {
        let live: Vec<TrainId> = self.mirror.live_trains().map(|t| t.id).collect();
        self.transport.register_events(kind, live).await
    }

    pub async fn subscribe(
        &mut self,
        kind: EventKind,
        trains: impl IntoIterator<Item = TrainId>,
    ) -> Result<()> {
        self.transport.register_events(kind, trains).await
    }

    /// Wait up to `wait` for notifications, then pop the oldest one. The
    /// train state an event carries is folded into the mirror before the
    /// event is handed out.
    pub async fn next_event(&mut self, wait: Duration) -> Result<Option<Event>> {
        Ok(self.transport.wait_for_event(wait).await?.map(|event| {
            self.mirror.apply_train_details(event.train.clone());
            self.graphs.sync_train(&self.mirror, event.train.id);
            event
        }))
    }

    /// Discard and resynthesize all four graphs from the mirror.
    pub fn rebuild_graphs(&mut self) {
        self.graphs.rebuild(&self.mirror);
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}
