//! The interception API.
//!
//! Every stream gets a pair of [`Processor`]s, one per direction. The relay
//! calls them once per logical frame event, with CONTINUATIONs already folded
//! into whole header blocks, and they forward (possibly edited) events to their
//! sinks. The last sink in a chain is a [`RelayAdapter`] that queues frames on
//! the outgoing relay.
//!
//! Concurrency: the client-to-server processor of a stream is only called from
//! the client-to-server loop and vice versa. Nothing serializes the two
//! directions against each other, so state shared between them must be atomic
//! or behind a lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{Error, Result};
use crate::h2_codec::PriorityParam;
use crate::hpack::{find_header, H2Header};
use crate::relay::Relay;

/// Direction of the traffic flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => write!(f, "client-to-server"),
            Direction::ServerToClient => write!(f, "server-to-client"),
        }
    }
}

/// Receives the frame events of one stream in one direction.
#[async_trait]
pub trait Processor: Send + Sync {
    /// A complete header block. `priority` is set when the initiating HEADERS
    /// frame carried priority metadata.
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()>;

    async fn data(&self, data: Bytes, end_stream: bool) -> Result<()>;

    async fn priority(&self, priority: PriorityParam) -> Result<()>;

    async fn rst_stream(&self, error_code: u32) -> Result<()>;

    /// A complete PUSH_PROMISE header block.
    async fn push_promise(&self, promise_id: u32, headers: Vec<H2Header>) -> Result<()>;
}

/// The two receiving endpoints of a stream.
#[derive(Clone)]
pub struct Processors {
    client_to_server: Arc<dyn Processor>,
    server_to_client: Arc<dyn Processor>,
}

impl fmt::Debug for Processors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processors").finish_non_exhaustive()
    }
}

impl Processors {
    pub fn new(client_to_server: Arc<dyn Processor>, server_to_client: Arc<dyn Processor>) -> Self {
        Self {
            client_to_server,
            server_to_client,
        }
    }

    /// The processor receiving traffic in the given direction.
    pub fn for_direction(&self, dir: Direction) -> &Arc<dyn Processor> {
        match dir {
            Direction::ClientToServer => &self.client_to_server,
            Direction::ServerToClient => &self.server_to_client,
        }
    }
}

/// Builds the processors for one stream from the request URL and the sinks
/// they must forward to.
///
/// Returns the client-to-server and server-to-client processors. `None` means
/// no processing in that direction: events go straight to the sink.
///
/// Factories compose: with several configured, each one's sinks are the
/// processors produced by the next, and the last one's sinks are the relays.
pub type StreamProcessorFactory = Arc<
    dyn Fn(&Url, &Processors) -> (Option<Arc<dyn Processor>>, Option<Arc<dyn Processor>>)
        + Send
        + Sync,
>;

/// Wrap `sinks` with the processors `factory` returns, passing straight through
/// for any direction it leaves out.
pub fn chain(factory: &StreamProcessorFactory, url: &Url, sinks: Processors) -> Processors {
    let (client_to_server, server_to_client) = factory(url, &sinks);
    Processors {
        client_to_server: client_to_server.unwrap_or(sinks.client_to_server),
        server_to_client: server_to_client.unwrap_or(sinks.server_to_client),
    }
}

/// Terminal sink: turns processor calls back into queued frames on a relay.
pub struct RelayAdapter {
    id: u32,
    relay: Weak<Relay>,
}

impl RelayAdapter {
    pub(crate) fn new(id: u32, relay: Weak<Relay>) -> Self {
        Self { id, relay }
    }

    fn relay(&self) -> Result<Arc<Relay>> {
        self.relay.upgrade().ok_or(Error::RelayClosed)
    }
}

#[async_trait]
impl Processor for RelayAdapter {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()> {
        self.relay()?.header(self.id, headers, end_stream, priority).await
    }

    async fn data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        self.relay()?.data(self.id, data, end_stream).await
    }

    async fn priority(&self, priority: PriorityParam) -> Result<()> {
        self.relay()?.priority(self.id, priority).await
    }

    async fn rst_stream(&self, error_code: u32) -> Result<()> {
        self.relay()?.rst_stream(self.id, error_code).await
    }

    async fn push_promise(&self, promise_id: u32, headers: Vec<H2Header>) -> Result<()> {
        self.relay()?.push_promise(self.id, promise_id, headers).await
    }
}

pub(crate) type CreateProcessors = Box<dyn Fn(u32, &Url) -> Processors + Send + Sync>;

/// Processors for every stream of a connection, created on first reference.
pub(crate) struct StreamProcessors {
    processors: Mutex<HashMap<u32, Processors>>,
    create: CreateProcessors,
    /// Used for streams whose first frame does not name a request.
    connection_url: Url,
}

impl StreamProcessors {
    pub(crate) fn new(connection_url: Url, create: CreateProcessors) -> Self {
        Self {
            processors: Mutex::new(HashMap::new()),
            create,
            connection_url,
        }
    }

    /// The processor for stream `id` in direction `dir`, creating the stream's
    /// pair if this is its first reference. `headers` is the decoded header
    /// block that caused the lookup, if any, and supplies the request URL.
    pub(crate) async fn get(
        &self,
        id: u32,
        dir: Direction,
        headers: Option<&[H2Header]>,
    ) -> Arc<dyn Processor> {
        let mut processors = self.processors.lock().await;
        let pair = processors.entry(id).or_insert_with(|| {
            let url = headers
                .and_then(request_url)
                .unwrap_or_else(|| self.connection_url.clone());
            (self.create)(id, &url)
        });
        pair.for_direction(dir).clone()
    }
}

/// Rebuild the request URL from request pseudo-headers.
pub fn request_url(headers: &[H2Header]) -> Option<Url> {
    let authority = find_header(headers, ":authority")?;
    let scheme = find_header(headers, ":scheme").unwrap_or("https");
    let path = find_header(headers, ":path").unwrap_or("/");
    Url::parse(&format!("{}://{}{}", scheme, authority, path)).ok()
}
