//! Proxy configuration and the per-connection entry point.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{error, info};
use url::Url;

use crate::error::{Error, Result};
use crate::framer::{FrameReader, FrameWriter};
use crate::h2_codec::{is_h2c_preface, CONNECTION_PREFACE};
use crate::processor::{chain, CreateProcessors, Direction, Processors, RelayAdapter, StreamProcessorFactory, StreamProcessors};
use crate::relay::{closed, Relay};

pub type HostFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for HTTP/2 interception.
#[derive(Clone, Default)]
pub struct Config {
    /// Returns true for hosts whose traffic may be intercepted as HTTP/2.
    /// Unset means no host is.
    pub allowed_hosts_filter: Option<HostFilter>,

    /// Factories for the per-stream processor chain, outermost first. A chain
    /// is built for every stream.
    pub stream_processor_factories: Vec<StreamProcessorFactory>,

    /// Turns on per-frame debug logging.
    pub enable_debug_logs: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("allowed_hosts_filter", &self.allowed_hosts_filter.is_some())
            .field("stream_processor_factories", &self.stream_processor_factories.len())
            .field("enable_debug_logs", &self.enable_debug_logs)
            .finish()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed_hosts(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.allowed_hosts_filter = Some(Arc::new(filter));
        self
    }

    /// Append a factory to the end of the chain.
    pub fn with_stream_processor_factory(mut self, factory: StreamProcessorFactory) -> Self {
        self.stream_processor_factories.push(factory);
        self
    }

    pub fn with_debug_logs(mut self, enabled: bool) -> Self {
        self.enable_debug_logs = enabled;
        self
    }

    /// Whether `host` may be intercepted as HTTP/2.
    pub fn allows_host(&self, host: &str) -> bool {
        self.allowed_hosts_filter
            .as_ref()
            .map_or(false, |filter| filter(host))
    }

    /// Proxy HTTP/2 between an accepted `client` connection and an established
    /// `server` connection for `url`.
    ///
    /// Both streams carry plain HTTP/2 frames; TLS is the caller's business.
    /// Returns when both directions have finished, when `closing` turns true,
    /// or as soon as either direction fails, with that error.
    pub async fn proxy<C, S>(
        &self,
        mut closing: watch::Receiver<bool>,
        client: C,
        server: S,
        url: &Url,
    ) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.enable_debug_logs {
            info!("proxying {} with HTTP/2", url);
        }
        let (mut client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        forward_preface(&mut client_read, &mut server_write).await?;

        let client_to_server = Arc::new(Relay::new(
            Direction::ClientToServer,
            "client",
            url.as_str(),
            FrameWriter::new(server_write),
            self.enable_debug_logs,
        ));
        let server_to_client = Arc::new(Relay::new(
            Direction::ServerToClient,
            url.as_str(),
            "client",
            FrameWriter::new(client_write),
            self.enable_debug_logs,
        ));
        Relay::link(&client_to_server, &server_to_client);

        let factories = self.stream_processor_factories.clone();
        let (c2s, s2c) = (
            Arc::downgrade(&client_to_server),
            Arc::downgrade(&server_to_client),
        );
        let create: CreateProcessors = Box::new(move |id: u32, url: &Url| {
            let mut processors = Processors::new(
                Arc::new(RelayAdapter::new(id, c2s.clone())),
                Arc::new(RelayAdapter::new(id, s2c.clone())),
            );
            for factory in factories.iter().rev() {
                processors = chain(factory, url, processors);
            }
            processors
        });
        let streams = Arc::new(StreamProcessors::new(url.clone(), create));
        client_to_server.set_processors(streams.clone());
        server_to_client.set_processors(streams);

        // Raised on external close or when either direction fails.
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = &stop_tx;

        let c2s_loop = {
            let relay = client_to_server.clone();
            let stop_rx = stop_rx.clone();
            async move {
                let result = relay.relay_frames(FrameReader::new(client_read), stop_rx).await;
                if let Err(e) = &result {
                    error!("relaying frames from client to {}: {}", url, e);
                    stop.send_replace(true);
                }
                result
            }
        };
        let s2c_loop = {
            let relay = server_to_client.clone();
            async move {
                let result = relay.relay_frames(FrameReader::new(server_read), stop_rx).await;
                if let Err(e) = &result {
                    error!("relaying frames from {} to client: {}", url, e);
                    stop.send_replace(true);
                }
                result
            }
        };

        let both = async move { tokio::join!(c2s_loop, s2c_loop) };
        tokio::pin!(both);
        let mut closing_seen = false;
        let (c2s_result, s2c_result) = loop {
            tokio::select! {
                results = &mut both => break results,
                _ = closed(&mut closing), if !closing_seen => {
                    closing_seen = true;
                    stop.send_replace(true);
                }
            }
        };
        // Releases the drain tasks of directions that ended at EOF.
        stop.send_replace(true);
        c2s_result.and(s2c_result)
    }
}

/// Forward the 24-byte connection preface from the client to the server,
/// rejecting anything else.
pub async fn forward_preface<R, W>(client: &mut R, server: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut preface = [0u8; CONNECTION_PREFACE.len()];
    client.read_exact(&mut preface).await?;
    if !is_h2c_preface(&preface) {
        return Err(Error::Preface(preface.to_vec()));
    }
    server.write_all(&preface).await?;
    server.flush().await?;
    Ok(())
}
