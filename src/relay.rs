//! One direction of a proxied HTTP/2 connection.
//!
//! A [`Relay`] reads frames from its source, hands stream events to the
//! stream's processors and writes what they send back out to its destination.
//! The two relays of a connection are peers: SETTINGS and WINDOW_UPDATE read by
//! one describe what the *other* may send, so each applies them to its peer.
//!
//! Frame emission is ordered per stream. Processor output is queued in a
//! per-stream [`OutputBuffer`] and moves to a bounded output channel once it
//! fits the stream and connection windows. A drain task writes the channel to
//! the destination. Connection-level replies (WINDOW_UPDATE, SETTINGS, PING,
//! GOAWAY) skip the queue and are written directly under the same lock.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::framer::{FrameReader, FrameWriter};
use crate::h2_codec::{settings_id, H2Frame, PriorityParam};
use crate::hpack::{H2Header, HpackDecoder, HpackEncoder};
use crate::output_buffer::OutputBuffer;
use crate::processor::{Direction, Processor, StreamProcessors};
use crate::queued_frame::QueuedFrame;

// See: https://httpwg.org/specs/rfc7540.html#SettingValues
pub const INITIAL_MAX_FRAME_SIZE: u32 = 16384;

// See: https://tools.ietf.org/html/rfc7540#section-6.9.2
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Capacity of the ordered output channel, roughly a window's worth of frames.
pub const OUTPUT_CHANNEL_SIZE: usize = 15;

/// Flow-control state, guarded by one lock per relay.
#[derive(Debug)]
struct FlowState {
    initial_window_size: u32,
    /// Connection-level window, separate from the per-stream ones.
    connection_window_size: i64,
    output_buffers: HashMap<u32, OutputBuffer>,
}

/// A header block split across HEADERS or PUSH_PROMISE plus CONTINUATIONs.
#[derive(Debug)]
enum Continuation {
    Header {
        stream_id: u32,
        end_stream: bool,
        priority: Option<PriorityParam>,
    },
    PushPromise {
        stream_id: u32,
        promise_id: u32,
    },
}

impl Continuation {
    fn stream_id(&self) -> u32 {
        match self {
            Continuation::Header { stream_id, .. } | Continuation::PushPromise { stream_id, .. } => {
                *stream_id
            }
        }
    }
}

/// Reassembly state for the header block currently being received. Owned by
/// the read loop.
#[derive(Debug, Default)]
struct HeaderReassembly {
    buffer: BytesMut,
    pending: Option<Continuation>,
}

impl HeaderReassembly {
    fn begin(&mut self, pending: Continuation, fragment: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(fragment);
        self.pending = Some(pending);
    }
}

pub struct Relay {
    dir: Direction,

    // Only used in log messages.
    src_label: String,
    dest_label: String,

    /// Written by the drain task and directly by both relays' loops; the peer
    /// writes WINDOW_UPDATEs here when it receives DATA.
    dest: Arc<Mutex<FrameWriter>>,

    /// Set by the peer's SETTINGS.
    max_frame_size: AtomicU32,

    decoder: Mutex<HpackDecoder>,
    encoder: Mutex<HpackEncoder>,

    flow: Mutex<FlowState>,

    output_tx: mpsc::Sender<QueuedFrame>,
    output_rx: Mutex<Option<mpsc::Receiver<QueuedFrame>>>,

    enable_debug_logs: bool,

    // Set once after both relays exist.
    peer: OnceLock<Weak<Relay>>,
    processors: OnceLock<Arc<StreamProcessors>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("dir", &self.dir)
            .field("src", &self.src_label)
            .field("dest", &self.dest_label)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay writing to `dest`. It is not usable until [`Relay::link`]
    /// and [`Relay::set_processors`] complete the wiring.
    pub fn new(
        dir: Direction,
        src_label: impl Into<String>,
        dest_label: impl Into<String>,
        dest: FrameWriter,
        enable_debug_logs: bool,
    ) -> Self {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_SIZE);
        Self {
            dir,
            src_label: src_label.into(),
            dest_label: dest_label.into(),
            dest: Arc::new(Mutex::new(dest)),
            max_frame_size: AtomicU32::new(INITIAL_MAX_FRAME_SIZE),
            decoder: Mutex::new(HpackDecoder::new()),
            encoder: Mutex::new(HpackEncoder::new()),
            flow: Mutex::new(FlowState {
                initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
                connection_window_size: DEFAULT_INITIAL_WINDOW_SIZE as i64,
                output_buffers: HashMap::new(),
            }),
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
            enable_debug_logs,
            peer: OnceLock::new(),
            processors: OnceLock::new(),
        }
    }

    /// Make `a` and `b` each other's peer.
    pub fn link(a: &Arc<Relay>, b: &Arc<Relay>) {
        let _ = a.peer.set(Arc::downgrade(b));
        let _ = b.peer.set(Arc::downgrade(a));
    }

    pub(crate) fn set_processors(&self, processors: Arc<StreamProcessors>) {
        let _ = self.processors.set(processors);
    }

    /// Relay frames from `src` until it ends, an error occurs or `closing`
    /// turns true.
    ///
    /// EOF on the source ends the loop without error. Frames still queued are
    /// dropped on close.
    pub async fn relay_frames(
        self: Arc<Self>,
        mut src: FrameReader,
        mut closing: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut output = self.output_rx.lock().await.take().ok_or(Error::RelayClosed)?;

        // Delivers the strictly ordered stream output.
        let (send_err_tx, mut send_err_rx) = mpsc::channel::<Error>(1);
        let relay = self.clone();
        let mut drain_closing = closing.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = output.recv() => frame,
                    _ = closed(&mut drain_closing) => return,
                };
                let Some(frame) = frame else { return };
                if let Err(e) = relay.send_queued(&frame).await {
                    let _ = send_err_tx.send(e).await;
                    return;
                }
            }
        });

        // Reads run on their own task so a blocked read cannot hold up
        // shutdown. On close the task is abandoned and exits once its pending
        // read completes.
        let (frame_tx, mut frame_rx) = mpsc::channel::<Result<Option<H2Frame>>>(1);
        tokio::spawn(async move {
            loop {
                let result = src.read_frame().await;
                let last = !matches!(result, Ok(Some(_)));
                if frame_tx.send(result).await.is_err() || last {
                    return;
                }
            }
        });

        let mut reassembly = HeaderReassembly::default();
        loop {
            let next = tokio::select! {
                next = frame_rx.recv() => next,
                Some(err) = send_err_rx.recv() => return Err(Error::SendFrame(Box::new(err))),
                _ = closed(&mut closing) => return Ok(()),
            };
            let frame = match next {
                Some(Ok(Some(frame))) => frame,
                Some(Ok(None)) | None => return Ok(()),
                Some(Err(e)) => return Err(Error::ReadFrame(Box::new(e))),
            };

            let description = frame.to_string();
            let processed = tokio::select! {
                processed = self.process_frame(frame, &mut reassembly) => processed,
                _ = closed(&mut closing) => return Ok(()),
            };
            if let Err(e) = processed {
                return Err(Error::ProcessFrame {
                    frame: description,
                    source: Box::new(e),
                });
            }
            if self.enable_debug_logs {
                debug!("{}--{}-->{}", self.src_label, description, self.dest_label);
            }
        }
    }

    async fn process_frame(&self, frame: H2Frame, reassembly: &mut HeaderReassembly) -> Result<()> {
        match frame {
            H2Frame::Data {
                stream_id,
                end_stream,
                data,
            } => {
                // Credit goes back as soon as the data arrives, whatever the
                // destination or processors do with it.
                self.peer()?.send_window_updates(stream_id, data.len()).await?;
                self.processor(stream_id, None).await?.data(data, end_stream).await
            }
            H2Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                fragment,
            } => {
                if !end_headers {
                    reassembly.begin(
                        Continuation::Header {
                            stream_id,
                            end_stream,
                            priority,
                        },
                        &fragment,
                    );
                    return Ok(());
                }
                let headers = self.decode(&fragment).await?;
                let processor = self.processor(stream_id, Some(&headers)).await?;
                processor.header(headers, end_stream, priority).await
            }
            H2Frame::Priority {
                stream_id,
                priority,
            } => self.processor(stream_id, None).await?.priority(priority).await,
            H2Frame::RstStream {
                stream_id,
                error_code,
            } => self.processor(stream_id, None).await?.rst_stream(error_code).await,
            H2Frame::Settings { ack: true, .. } => {
                self.write_direct(vec![H2Frame::Settings {
                    ack: true,
                    settings: Vec::new(),
                }])
                .await
            }
            H2Frame::Settings {
                ack: false,
                settings,
            } => {
                let peer = self.peer()?;
                for &(id, value) in &settings {
                    match id {
                        settings_id::HEADER_TABLE_SIZE => peer.update_table_size(value).await,
                        settings_id::INITIAL_WINDOW_SIZE => {
                            peer.update_initial_window_size(value).await?
                        }
                        settings_id::MAX_FRAME_SIZE => peer.update_max_frame_size(value),
                        _ => {}
                    }
                }
                self.write_direct(vec![H2Frame::Settings {
                    ack: false,
                    settings,
                }])
                .await
            }
            H2Frame::PushPromise {
                stream_id,
                promise_id,
                end_headers,
                fragment,
            } => {
                if !end_headers {
                    reassembly.begin(
                        Continuation::PushPromise {
                            stream_id,
                            promise_id,
                        },
                        &fragment,
                    );
                    return Ok(());
                }
                let headers = self.decode(&fragment).await?;
                self.processor(stream_id, None)
                    .await?
                    .push_promise(promise_id, headers)
                    .await
            }
            frame @ (H2Frame::Ping { .. } | H2Frame::GoAway { .. }) => self.write_direct(vec![frame]).await,
            H2Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.peer()?.update_window(stream_id, increment).await,
            H2Frame::Continuation {
                stream_id,
                end_headers,
                fragment,
            } => {
                let expected = match &reassembly.pending {
                    Some(pending) => pending.stream_id(),
                    None => return Err(Error::UnexpectedContinuation { stream_id }),
                };
                if expected != stream_id {
                    return Err(Error::ContinuationStreamMismatch {
                        expected,
                        got: stream_id,
                    });
                }
                reassembly.buffer.extend_from_slice(&fragment);
                if !end_headers {
                    return Ok(());
                }
                let block = reassembly.buffer.split().freeze();
                let Some(pending) = reassembly.pending.take() else {
                    return Err(Error::UnexpectedContinuation { stream_id });
                };
                let headers = self.decode(&block).await?;
                match pending {
                    Continuation::Header {
                        end_stream,
                        priority,
                        ..
                    } => {
                        let processor = self.processor(stream_id, Some(&headers)).await?;
                        processor.header(headers, end_stream, priority).await
                    }
                    Continuation::PushPromise { promise_id, .. } => {
                        self.processor(stream_id, None)
                            .await?
                            .push_promise(promise_id, headers)
                            .await
                    }
                }
            }
            H2Frame::Unknown { frame_type, .. } => Err(Error::UnknownFrameType(frame_type)),
        }
    }

    fn peer(&self) -> Result<Arc<Relay>> {
        self.peer
            .get()
            .and_then(Weak::upgrade)
            .ok_or(Error::RelayClosed)
    }

    async fn processor(&self, id: u32, headers: Option<&[H2Header]>) -> Result<Arc<dyn Processor>> {
        let processors = self.processors.get().ok_or(Error::RelayClosed)?;
        Ok(processors.get(id, self.dir, headers).await)
    }

    /// Write `frames` to the destination, bypassing the output queue.
    ///
    /// The write runs on its own task: the read loop drops `process_frame` at
    /// close, and the destination must not be left holding part of a frame.
    async fn write_direct(&self, frames: Vec<H2Frame>) -> Result<()> {
        let dest = self.dest.clone();
        let write = tokio::spawn(async move {
            let mut dest = dest.lock().await;
            for frame in &frames {
                dest.write_frame(frame).await?;
            }
            Ok::<(), Error>(())
        });
        write
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }

    // Peer-facing state updates. These are called from the peer's loop.

    async fn update_table_size(&self, size: u32) {
        self.encoder.lock().await.set_max_table_size(size as usize);
    }

    fn update_max_frame_size(&self, size: u32) {
        self.max_frame_size.store(size, Ordering::Relaxed);
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE as a delta to every stream
    /// window, not the connection window.
    /// See: https://tools.ietf.org/html/rfc7540#section-6.9.2
    async fn update_initial_window_size(&self, size: u32) -> Result<()> {
        let mut flow = self.flow.lock().await;
        let delta = size as i64 - flow.initial_window_size as i64;
        flow.initial_window_size = size;
        for buffer in flow.output_buffers.values_mut() {
            buffer.adjust_window(delta);
        }
        // Any stream may have become eligible.
        self.emit_all(&mut flow).await
    }

    async fn update_window(&self, stream_id: u32, increment: u32) -> Result<()> {
        let mut flow = self.flow.lock().await;
        if stream_id == 0 {
            flow.connection_window_size += increment as i64;
            return self.emit_all(&mut flow).await;
        }
        let FlowState {
            initial_window_size,
            connection_window_size,
            output_buffers,
        } = &mut *flow;
        let buffer = output_buffers
            .entry(stream_id)
            .or_insert_with(|| OutputBuffer::new(*initial_window_size as i64));
        buffer.adjust_window(increment as i64);
        let eligible = buffer.emit_eligible_frames(connection_window_size);
        self.send_output(eligible).await
    }

    /// Acknowledge `len` received bytes on the connection and on the stream.
    async fn send_window_updates(&self, stream_id: u32, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let increment = len as u32;
        self.write_direct(vec![
            H2Frame::WindowUpdate {
                stream_id: 0,
                increment,
            },
            H2Frame::WindowUpdate {
                stream_id,
                increment,
            },
        ])
        .await
    }

    // Write side, reached through RelayAdapter.

    pub(crate) async fn data(&self, id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        let max_payload_length = self.max_frame_size.load(Ordering::Relaxed).max(1) as usize;
        let mut remaining = data;
        // An empty payload still sends one frame, for END_STREAM.
        loop {
            let chunk = remaining.split_to(remaining.len().min(max_payload_length));
            self.enqueue_frame(QueuedFrame::Data {
                stream_id: id,
                end_stream: end_stream && remaining.is_empty(),
                data: chunk,
            })
            .await?;
            if remaining.is_empty() {
                return Ok(());
            }
        }
    }

    pub(crate) async fn header(
        &self,
        id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()> {
        self.enqueue_frame(QueuedFrame::Header {
            stream_id: id,
            end_stream,
            priority,
            headers,
        })
        .await
    }

    pub(crate) async fn push_promise(&self, id: u32, promise_id: u32, headers: Vec<H2Header>) -> Result<()> {
        self.enqueue_frame(QueuedFrame::PushPromise {
            stream_id: id,
            promise_id,
            headers,
        })
        .await
    }

    pub(crate) async fn priority(&self, id: u32, priority: PriorityParam) -> Result<()> {
        self.enqueue_frame(QueuedFrame::Priority {
            stream_id: id,
            priority,
        })
        .await
    }

    pub(crate) async fn rst_stream(&self, id: u32, error_code: u32) -> Result<()> {
        self.enqueue_frame(QueuedFrame::RstStream {
            stream_id: id,
            error_code,
        })
        .await
    }

    /// Append `frame` to its stream's buffer and emit whatever is eligible.
    async fn enqueue_frame(&self, frame: QueuedFrame) -> Result<()> {
        let mut flow = self.flow.lock().await;
        let FlowState {
            initial_window_size,
            connection_window_size,
            output_buffers,
        } = &mut *flow;
        let buffer = output_buffers
            .entry(frame.stream_id())
            .or_insert_with(|| OutputBuffer::new(*initial_window_size as i64));
        buffer.enqueue(frame);
        let eligible = buffer.emit_eligible_frames(connection_window_size);
        self.send_output(eligible).await
    }

    async fn emit_all(&self, flow: &mut FlowState) -> Result<()> {
        let FlowState {
            connection_window_size,
            output_buffers,
            ..
        } = flow;
        for buffer in output_buffers.values_mut() {
            let eligible = buffer.emit_eligible_frames(connection_window_size);
            self.send_output(eligible).await?;
        }
        Ok(())
    }

    /// Push emitted frames onto the output channel. Called with the flow lock
    /// held so channel order matches debit order.
    async fn send_output(&self, frames: Vec<QueuedFrame>) -> Result<()> {
        for frame in frames {
            self.output_tx
                .send(frame)
                .await
                .map_err(|_| Error::RelayClosed)?;
        }
        Ok(())
    }

    async fn decode(&self, block: &[u8]) -> Result<Vec<H2Header>> {
        self.decoder.lock().await.decode(block)
    }

    /// Encode and write one queued frame with its CONTINUATIONs. Only the
    /// drain task calls this, so header blocks are encoded in wire order.
    async fn send_queued(&self, frame: &QueuedFrame) -> Result<()> {
        if self.enable_debug_logs {
            if let QueuedFrame::Header { headers, .. } | QueuedFrame::PushPromise { headers, .. } = frame {
                let mut listing = String::new();
                for h in headers {
                    if h.name == "content-type" && h.value.starts_with("application/grpc") {
                        listing.push_str(&format!("  {} [grpc]\n", h));
                    } else {
                        listing.push_str(&format!("  {}\n", h));
                    }
                }
                debug!("sending headers {} -> {}:\n{}", self.src_label, self.dest_label, listing);
            }
        }
        let max_frame_size = self.max_frame_size.load(Ordering::Relaxed).max(1) as usize;
        let frames = frame.to_frames(&mut *self.encoder.lock().await, max_frame_size);
        let mut dest = self.dest.lock().await;
        for frame in &frames {
            dest.write_frame(frame).await?;
        }
        Ok(())
    }
}

/// Resolve once `closing` is true. Never resolves if the sender is gone
/// without having signalled.
pub(crate) async fn closed(closing: &mut watch::Receiver<bool>) {
    let signalled = closing.wait_for(|closing| *closing).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}
