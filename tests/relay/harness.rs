#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use h2_intercept::{
    Config, FrameReader, FrameWriter, H2Frame, H2Header, HpackDecoder, HpackEncoder, Result,
    CONNECTION_PREFACE,
};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

const PIPE_CAPACITY: usize = 1 << 20;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// One end of a proxied connection as seen by the test.
pub struct Peer {
    reader: FrameReader,
    writer: FrameWriter,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
}

impl Peer {
    fn new(io: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(io);
        Self {
            reader: FrameReader::new(read),
            writer: FrameWriter::new(write),
            encoder: HpackEncoder::new(),
            decoder: HpackDecoder::new(),
        }
    }

    pub async fn send(&mut self, frame: H2Frame) {
        self.writer.write_frame(&frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_raw(data).await.unwrap();
    }

    /// HPACK-encode `headers` into one complete HEADERS frame.
    pub async fn send_headers(&mut self, stream_id: u32, headers: &[H2Header], end_stream: bool) {
        let fragment = Bytes::from(self.encoder.encode(headers));
        self.send(H2Frame::Headers {
            stream_id,
            end_stream,
            end_headers: true,
            priority: None,
            fragment,
        })
        .await;
    }

    pub async fn send_data(&mut self, stream_id: u32, data: &'static [u8], end_stream: bool) {
        self.send(H2Frame::Data {
            stream_id,
            end_stream,
            data: Bytes::from_static(data),
        })
        .await;
    }

    pub fn encode(&mut self, headers: &[H2Header]) -> Bytes {
        Bytes::from(self.encoder.encode(headers))
    }

    pub fn decode(&mut self, block: &[u8]) -> Vec<H2Header> {
        self.decoder.decode(block).unwrap()
    }

    pub async fn recv(&mut self) -> H2Frame {
        tokio::time::timeout(READ_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed while waiting for a frame")
    }

    /// Next frame that is not a WINDOW_UPDATE.
    pub async fn recv_skipping_window_updates(&mut self) -> H2Frame {
        loop {
            match self.recv().await {
                H2Frame::WindowUpdate { .. } => continue,
                frame => return frame,
            }
        }
    }

    /// Receive a header block, following CONTINUATIONs, and decode it.
    pub async fn recv_headers(&mut self) -> (u32, Vec<H2Header>, bool) {
        let (stream_id, end_stream, mut end_headers, fragment) =
            match self.recv_skipping_window_updates().await {
                H2Frame::Headers {
                    stream_id,
                    end_stream,
                    end_headers,
                    fragment,
                    ..
                } => (stream_id, end_stream, end_headers, fragment),
                other => panic!("expected HEADERS, got {other}"),
            };
        let mut block = fragment.to_vec();
        while !end_headers {
            match self.recv().await {
                H2Frame::Continuation {
                    stream_id: id,
                    end_headers: last,
                    fragment,
                } => {
                    assert_eq!(id, stream_id);
                    block.extend_from_slice(&fragment);
                    end_headers = last;
                }
                other => panic!("expected CONTINUATION, got {other}"),
            }
        }
        (stream_id, self.decode(&block), end_stream)
    }

    /// Assert nothing arrives for a short while.
    pub async fn expect_quiet(&mut self) {
        if let Ok(frame) = tokio::time::timeout(QUIET_PERIOD, self.reader.read_frame()).await {
            panic!("expected no frame, got {:?}", frame);
        }
    }

    pub async fn expect_closed(&mut self) {
        let frame = tokio::time::timeout(READ_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for close");
        assert!(matches!(frame, Ok(None)), "expected EOF, got {:?}", frame);
    }
}

/// A running proxy with a client and a server attached.
pub struct Proxied {
    pub client: Peer,
    pub server: Peer,
    pub close: watch::Sender<bool>,
    pub task: JoinHandle<Result<()>>,
}

impl Proxied {
    /// Start the proxy, send the client preface and check the server gets it.
    pub async fn start(config: Config) -> Self {
        let (client, proxy_client) = tokio::io::duplex(PIPE_CAPACITY);
        let (mut server, proxy_server) = tokio::io::duplex(PIPE_CAPACITY);
        let (close, closing) = watch::channel(false);
        let url = test_url();
        let task = tokio::spawn(async move {
            config.proxy(closing, proxy_client, proxy_server, &url).await
        });

        let mut client = Peer::new(client);
        client.send_raw(CONNECTION_PREFACE).await;

        let mut preface = [0u8; 24];
        tokio::time::timeout(READ_TIMEOUT, server.read_exact(&mut preface))
            .await
            .expect("timed out waiting for the preface")
            .unwrap();
        assert_eq!(&preface[..], CONNECTION_PREFACE);

        Self {
            client,
            server: Peer::new(server),
            close,
            task,
        }
    }

    /// Hang up both peers and wait for the proxy to return.
    pub async fn hang_up(self) -> Result<()> {
        let Proxied {
            client,
            server,
            close: _close,
            task,
        } = self;
        drop(client);
        drop(server);
        join(task).await
    }
}

pub async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    tokio::time::timeout(READ_TIMEOUT, task)
        .await
        .expect("proxy did not finish")
        .unwrap()
}

pub fn test_url() -> Url {
    Url::parse("https://api.example.com/").unwrap()
}

pub fn request_headers(path: &str) -> Vec<H2Header> {
    vec![
        H2Header::new(":method", "POST"),
        H2Header::new(":scheme", "https"),
        H2Header::new(":authority", "api.example.com"),
        H2Header::new(":path", path),
    ]
}

pub fn response_headers() -> Vec<H2Header> {
    vec![
        H2Header::new(":status", "200"),
        H2Header::new("content-type", "text/plain"),
    ]
}
