use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    ready,
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::Message,
    WebSocketStream,
};

use crate::transport::socket::{
    Frame,
    Socket,
};

/// A [`Socket`] backed by a real WebSocket over a TCP stream.
///
/// Mirrors the teacher's `WebSocketTransport`, minus the binary/MessagePack
/// split, since this protocol is JSON text only (spec §6).
#[derive(Debug)]
pub struct WebSocketSocket {
    stream: WebSocketStream<TcpStream>,
}

impl WebSocketSocket {
    pub fn new(stream: WebSocketStream<TcpStream>) -> Self {
        Self { stream }
    }
}

impl Socket for WebSocketSocket {
    fn socket_kind(&self) -> &'static str {
        "WebSocketSocket"
    }
}

impl Stream for WebSocketSocket {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<Self::Item>> {
        match ready!(self.stream.poll_next_unpin(cx)) {
            Some(Ok(message)) => {
                if message.is_ping() {
                    task::Poll::Ready(Some(Ok(Frame::Ping(message.into_data().to_vec()))))
                } else if message.is_text() {
                    match message.into_text() {
                        Ok(text) => task::Poll::Ready(Some(Ok(Frame::Text(text.to_string())))),
                        Err(err) => task::Poll::Ready(Some(Err(Error::new(err)))),
                    }
                } else if message.is_close() {
                    task::Poll::Ready(None)
                } else {
                    task::Poll::Ready(Some(Err(Error::msg("unexpected non-text websocket frame"))))
                }
            }
            Some(Err(err)) => task::Poll::Ready(Some(Err(err.into()))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<Frame> for WebSocketSocket {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Result<()>> {
        self.stream.poll_ready_unpin(cx).map_err(Error::new)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> Result<()> {
        let message = match item {
            Frame::Ping(data) => Message::Pong(data.into()),
            Frame::Text(text) => Message::Text(text.into()),
        };
        self.stream.start_send_unpin(message).map_err(Error::new)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Result<()>> {
        self.stream.poll_flush_unpin(cx).map_err(Error::new)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Result<()>> {
        self.stream.poll_close_unpin(cx).map_err(Error::new)
    }
}
