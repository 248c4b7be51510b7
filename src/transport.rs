//! Transport abstraction over a bidirectional frame stream.
//!
//! The pool never touches a socket type directly. A [`Transport`] is a boxed
//! frame sink plus a boxed frame stream; [`Transport::from_websocket`] adapts an
//! axum WebSocket and any other `Sink`/`Stream` pair can be plugged in through
//! [`Transport::new`].

use std::pin::Pin;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};

/// Boxed outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Boxed inbound half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// A single logical frame exchanged with a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opaque application payload.
    Message(Bytes),
    /// Liveness probe.
    Ping(Bytes),
    /// Liveness acknowledgment.
    Pong(Bytes),
    /// Graceful close.
    Close,
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            // Payloads that are valid UTF-8 go out as text frames.
            Frame::Message(payload) => match std::str::from_utf8(&payload) {
                Ok(text) => Message::Text(text.to_owned().into()),
                Err(_) => Message::Binary(payload),
            },
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Message(Bytes::from(text.as_str().to_owned())),
            Message::Binary(payload) => Frame::Message(payload),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// The peer went away without a close frame.
    #[error("connection closed")]
    Closed,

    /// No frame arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,
}

/// A bidirectional frame channel to one peer.
pub struct Transport {
    sink: FrameSink,
    stream: FrameStream,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport from an arbitrary sink and stream.
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Adapts an upgraded axum WebSocket.
    #[must_use]
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
        let stream = stream.map(|result| result.map(Frame::from).map_err(TransportError::from));

        Self::new(sink, stream)
    }

    /// Splits the transport into its write and read halves.
    #[must_use]
    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl From<WebSocket> for Transport {
    fn from(socket: WebSocket) -> Self {
        Self::from_websocket(socket)
    }
}
