use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use h2_intercept::grpc::{as_stream_processor_factory, MessageProcessor, ProcessorFactory};
use h2_intercept::processor::chain;
use h2_intercept::{Direction, H2Header, PriorityParam, Processor, Processors, Result};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Header(Vec<H2Header>, bool),
    Data(Bytes, bool),
    Message(Bytes, bool),
    Priority(PriorityParam),
    RstStream(u32),
    PushPromise(u32, Vec<H2Header>),
}

/// Records whatever reaches it, as an HTTP/2 sink or as a message processor.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[async_trait]
impl Processor for Recorder {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        _: Option<PriorityParam>,
    ) -> Result<()> {
        self.push(Event::Header(headers, end_stream))
    }

    async fn data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        self.push(Event::Data(data, end_stream))
    }

    async fn priority(&self, priority: PriorityParam) -> Result<()> {
        self.push(Event::Priority(priority))
    }

    async fn rst_stream(&self, error_code: u32) -> Result<()> {
        self.push(Event::RstStream(error_code))
    }

    async fn push_promise(&self, promise_id: u32, headers: Vec<H2Header>) -> Result<()> {
        self.push(Event::PushPromise(promise_id, headers))
    }
}

#[async_trait]
impl MessageProcessor for Recorder {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        _: Option<PriorityParam>,
    ) -> Result<()> {
        self.push(Event::Header(headers, end_stream))
    }

    async fn message(&self, data: Bytes, end_stream: bool) -> Result<()> {
        self.push(Event::Message(data, end_stream))
    }
}

/// One stream's adapted processors with recording HTTP/2 sinks behind them.
pub struct AdaptedStream {
    pub c2s: Arc<dyn Processor>,
    pub s2c: Arc<dyn Processor>,
    /// What would be sent to the server.
    pub to_server: Arc<Recorder>,
    /// What would be sent to the client.
    pub to_client: Arc<Recorder>,
}

impl AdaptedStream {
    pub fn new(factory: ProcessorFactory) -> Self {
        let to_server = Recorder::new();
        let to_client = Recorder::new();
        let sinks = Processors::new(to_server.clone(), to_client.clone());
        let url = Url::parse("https://grpc.example.com/pkg.Echo/Say").unwrap();
        let processors = chain(&as_stream_processor_factory(factory), &url, sinks);
        Self {
            c2s: processors.for_direction(Direction::ClientToServer).clone(),
            s2c: processors.for_direction(Direction::ServerToClient).clone(),
            to_server,
            to_client,
        }
    }
}

/// A factory whose processors record messages without forwarding them.
pub fn capture(c2s: Arc<Recorder>, s2c: Arc<Recorder>) -> ProcessorFactory {
    Arc::new(
        move |_: &Url, _: Arc<dyn MessageProcessor>, _: Arc<dyn MessageProcessor>| {
            (
                Some(c2s.clone() as Arc<dyn MessageProcessor>),
                Some(s2c.clone() as Arc<dyn MessageProcessor>),
            )
        },
    )
}

/// A factory that leaves both directions to the default forwarder.
pub fn forward_only() -> ProcessorFactory {
    Arc::new(
        |_: &Url, _: Arc<dyn MessageProcessor>, _: Arc<dyn MessageProcessor>| {
            (
                None::<Arc<dyn MessageProcessor>>,
                None::<Arc<dyn MessageProcessor>>,
            )
        },
    )
}

pub fn grpc_request(encoding: Option<&str>) -> Vec<H2Header> {
    let mut headers = vec![
        H2Header::new(":method", "POST"),
        H2Header::new(":scheme", "https"),
        H2Header::new(":authority", "grpc.example.com"),
        H2Header::new(":path", "/pkg.Echo/Say"),
        H2Header::new("content-type", "application/grpc"),
        H2Header::new("te", "trailers"),
    ];
    if let Some(encoding) = encoding {
        headers.push(H2Header::new("grpc-encoding", encoding));
    }
    headers
}
