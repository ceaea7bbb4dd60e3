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
use tokio::sync::mpsc;

use crate::transport::socket::{
    Frame,
    Socket,
};

/// An in-process [`Socket`] backed by a pair of unbounded channels.
///
/// Mirrors the teacher's `DirectMessageStream` / `RouterHandle::direct_connect`:
/// tests construct a connected pair with [`direct_socket_pair`] and drive one end
/// while asserting against the other, without binding a real TCP listener.
#[derive(Debug)]
pub struct DirectSocket {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

/// Creates two ends of an in-process socket, each seeing the frames sent by the
/// other.
pub fn direct_socket_pair() -> (DirectSocket, DirectSocket) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        DirectSocket { tx: a_tx, rx: a_rx },
        DirectSocket { tx: b_tx, rx: b_rx },
    )
}

impl Socket for DirectSocket {
    fn socket_kind(&self) -> &'static str {
        "DirectSocket"
    }
}

impl Stream for DirectSocket {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<Self::Item>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(frame) => task::Poll::Ready(Some(Ok(frame))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<Frame> for DirectSocket {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<Result<()>> {
        task::Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<()> {
        self.tx.send(item).map_err(|err| Error::msg(err.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<Result<()>> {
        task::Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut task::Context<'_>) -> task::Poll<Result<()>> {
        task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_frames_between_ends() {
        let (mut a, mut b) = direct_socket_pair();
        a.send(Frame::Text("hello".to_owned())).await.unwrap();
        let received = b.next().await.unwrap().unwrap();
        match received {
            Frame::Text(text) => assert_eq!(text, "hello"),
            _ => panic!("expected text frame"),
        }
    }
}
