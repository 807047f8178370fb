//! TCP transport: connection lifecycle, request/response correlation and
//! event buffering.
//!
//! The protocol is strictly one-outstanding-request-at-a-time per
//! connection; `&mut self` on [`Transport::send`] and
//! [`Transport::await_tag`] makes that discipline structural. The read path
//! assembles one complete document at a time and classifies it: the awaited
//! tag is returned, unsolicited events are queued, anything else is logged
//! and dropped.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use stellwerk_proto::messages::PROTOCOL_VERSION;
use stellwerk_proto::{
    record, Document, DocumentAssembler, Error, Event, EventKind, Result, Status, TrainId,
};

/// Timeout for the greeting and registration exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity announced to the simulator during registration.
#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub name: String,
    pub author: String,
    pub version: String,
    pub text: String,
}

#[derive(Debug)]
pub struct Transport {
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    assembler: DocumentAssembler,
    // Bytes of an incomplete line, kept across cancelled reads.
    partial: Vec<u8>,
    events: VecDeque<Event>,
    registered_events: HashSet<(EventKind, TrainId)>,
}

impl Transport {
    /// Open the exclusive socket and perform the registration handshake.
    ///
    /// A greeting or registration status >= 400 fails with
    /// [`Error::Protocol`]; codes in [300, 400) are logged and tolerated.
    pub async fn connect(host: &str, port: u16, registration: &Registration) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read, write) = stream.into_split();
        let mut transport = Self {
            reader: Some(BufReader::new(read)),
            writer: Some(write),
            assembler: DocumentAssembler::new(),
            partial: Vec::new(),
            events: VecDeque::new(),
            registered_events: HashSet::new(),
        };

        let greeting = transport
            .await_tag(Status::TAG, Some(HANDSHAKE_TIMEOUT))
            .await?;
        transport.check_status(&greeting)?;

        transport
            .send(
                "register",
                &[
                    ("name", &registration.name),
                    ("autor", &registration.author),
                    ("version", &registration.version),
                    ("protokoll", PROTOCOL_VERSION),
                    ("text", &registration.text),
                ],
            )
            .await?;
        let ack = transport
            .await_tag(Status::TAG, Some(HANDSHAKE_TIMEOUT))
            .await?;
        transport.check_status(&ack)?;

        info!(host, port, "registered with simulator");
        Ok(transport)
    }

    fn check_status(&self, doc: &Document) -> Result<()> {
        let status = Status::from_document(doc)?;
        if status.is_fatal() {
            return Err(Error::Protocol {
                code: status.code,
                text: status.text,
            });
        }
        if status.is_warning() {
            warn!(code = status.code, text = %status.text, "simulator status warning");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Serialize and write one self-closing request record.
    pub async fn send(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        writer.write_all(record::request(tag, attrs).as_bytes()).await?;
        Ok(())
    }

    /// Read documents until one matching `tag` arrives.
    ///
    /// Events seen on the way are queued. `None` waits indefinitely and is
    /// reserved for passive event polling; every awaited response must pass
    /// a bounded timeout. On timeout nothing read so far is lost: queued
    /// events stay queued and partial documents stay buffered.
    pub async fn await_tag(&mut self, tag: &str, timeout: Option<Duration>) -> Result<Document> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let doc = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.read_document())
                    .await
                    .map_err(|_| Error::Timeout { tag: tag.to_string() })??,
                None => self.read_document().await?,
            };
            if doc.tag == tag {
                return Ok(doc);
            }
            self.classify(doc);
        }
    }

    /// Drive the read path for up to `wait`, queueing any events that
    /// arrive. Returns the number of newly queued events.
    pub async fn pump_events(&mut self, wait: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + wait;
        let before = self.events.len();
        loop {
            match tokio::time::timeout_at(deadline, self.read_document()).await {
                Ok(doc) => self.classify(doc?),
                Err(_) => return Ok(self.events.len() - before),
            }
        }
    }

    fn classify(&mut self, doc: Document) {
        if doc.tag == Event::TAG {
            match Event::from_document(&doc) {
                Ok(event) => self.events.push_back(event),
                Err(err) => warn!(%err, "dropping unparseable event"),
            }
        } else {
            debug!(tag = %doc.tag, "dropping unexpected document");
        }
    }

    /// Wait up to `wait` for a queued event, returning as soon as one is
    /// available.
    pub async fn wait_for_event(&mut self, wait: Duration) -> Result<Option<Event>> {
        let deadline = tokio::time::Instant::now() + wait;
        while self.events.is_empty() {
            match tokio::time::timeout_at(deadline, self.read_document()).await {
                Ok(doc) => self.classify(doc?),
                Err(_) => break,
            }
        }
        Ok(self.events.pop_front())
    }

    /// Pop the oldest queued event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Drain every queued event in arrival order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    /// Subscribe to notifications of `kind` for the given trains.
    ///
    /// Already-registered (kind, train) pairs are skipped; the simulator
    /// would otherwise duplicate deliveries.
    pub async fn register_events(
        &mut self,
        kind: EventKind,
        trains: impl IntoIterator<Item = TrainId>,
    ) -> Result<()> {
        for train in trains {
            if !self.registered_events.insert((kind, train)) {
                continue;
            }
            let zid = train.to_string();
            let art = kind.to_string();
            self.send(Event::TAG, &[("art", &art), ("zid", &zid)]).await?;
        }
        Ok(())
    }

    /// Release the socket. Idempotent; any blocked read aborts.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    /// Read until one complete document is available.
    ///
    /// This future is routinely raced against a deadline, so nothing it has
    /// read may be lost on cancellation. `fill_buf` leaves bytes in the
    /// reader until `consume`, and a line that is still missing its
    /// terminator waits in `partial`; the only await sits between those two
    /// buffers.
    async fn read_document(&mut self) -> Result<Document> {
        // A previous line may have carried more than one document.
        if self.assembler.pending() > 0 {
            if let Some(doc) = self.assembler.feed("")? {
                return Ok(doc);
            }
        }
        loop {
            while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.partial.drain(..=end).collect();
                match self.assembler.feed(&String::from_utf8_lossy(&line)) {
                    Ok(Some(doc)) => return Ok(doc),
                    Ok(None) => {}
                    Err(err) => warn!(%err, "skipping malformed line"),
                }
            }
            let reader = self.reader.as_mut().ok_or_else(closed)?;
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Err(Error::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "simulator closed the connection",
                )));
            }
            let n = chunk.len();
            self.partial.extend_from_slice(chunk);
            reader.consume(n);
        }
    }
}

fn closed() -> Error {
    Error::Connection(io::Error::new(
        io::ErrorKind::NotConnected,
        "transport is closed",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Accepts one client, answers the handshake, then runs `script` on the
    /// raw socket.
    async fn handshake_server<F, Fut>(script: F) -> std::net::SocketAddr
    where
        F: FnOnce(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"<status code='200'>hello</status>\n")
                .await
                .unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await; // register record
            sock.write_all(b"<status code='200'>ok</status>\n")
                .await
                .unwrap();
            script(sock).await;
        });
        addr
    }

    async fn connect(addr: std::net::SocketAddr) -> Result<Transport> {
        Transport::connect(&addr.ip().to_string(), addr.port(), &Registration::default()).await
    }

    #[tokio::test]
    async fn test_fatal_handshake_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"<status code='402'>incompatible</status>\n")
                .await
                .unwrap();
        });

        let err = connect(addr).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { code: 402, .. }));
    }

    #[tokio::test]
    async fn test_warning_handshake_continues() {
        let addr = handshake_server(|_sock| async {}).await;
        // 200-level handshake in the helper; a 3xx greeting variant:
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let warn_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"<status code='310'>old protocol</status>\n")
                .await
                .unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"<status code='300'>noted</status>\n")
                .await
                .unwrap();
        });

        assert!(connect(addr).await.is_ok());
        assert!(connect(warn_addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_events_are_queued_while_awaiting() {
        let addr = handshake_server(|mut sock| async move {
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await; // the request
            sock.write_all(
                b"<ereignis zid='5' art='ankunft' name='RE 1' gleis='A 1' />\n\
                  <zugliste><zug zid='5' name='RE 1' /></zugliste>\n",
            )
            .await
            .unwrap();
        })
        .await;

        let mut transport = connect(addr).await.unwrap();
        transport.send("zugliste", &[]).await.unwrap();
        let doc = transport
            .await_tag("zugliste", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(doc.tag, "zugliste");

        let event = transport.poll_event().expect("event queued");
        assert_eq!(event.kind, EventKind::Arrival);
        assert_eq!(event.train.id, TrainId(5));
        assert!(transport.poll_event().is_none());
    }

    #[tokio::test]
    async fn test_await_tag_times_out() {
        let addr = handshake_server(|mut sock| async move {
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await; // request, never answered
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let mut transport = connect(addr).await.unwrap();
        transport.send("zugliste", &[]).await.unwrap();
        let err = transport
            .await_tag("zugliste", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(transport.queued_events(), 0);
    }

    #[tokio::test]
    async fn test_partial_line_survives_timeout() {
        let addr = handshake_server(|mut sock| async move {
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await; // the request
            // Stall mid-line long enough for the client to give up once.
            sock.write_all(b"<simzeit zei").await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            sock.write_all(b"t='60000' />\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        let mut transport = connect(addr).await.unwrap();
        transport.send("simzeit", &[("sender", "0")]).await.unwrap();
        let err = transport
            .await_tag("simzeit", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        // The bytes read before the timeout are still there; the retry sees
        // the whole document.
        let doc = transport
            .await_tag("simzeit", Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(doc.attr("zeit"), Some("60000"));
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_abort_read_loop() {
        let addr = handshake_server(|mut sock| async move {
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await;
            sock.write_all(b"<garbage attr='unterminated />\n<simzeit zeit='60000' />\n")
                .await
                .unwrap();
        })
        .await;

        let mut transport = connect(addr).await.unwrap();
        transport.send("simzeit", &[("sender", "0")]).await.unwrap();
        let doc = transport
            .await_tag("simzeit", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(doc.attr("zeit"), Some("60000"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let addr = handshake_server(|_sock| async {}).await;
        let mut transport = connect(addr).await.unwrap();
        transport.close();
        transport.close();
        assert!(!transport.is_connected());
        assert!(transport.send("zugliste", &[]).await.is_err());
    }
}
