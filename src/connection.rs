//! Outbound half of an event-stream response.
//!
//! Frames travel over a bounded channel whose receiving end becomes the HTTP
//! body. Each frame is one channel message, so concurrent writers can never
//! interleave bytes inside a frame. When the client goes away the server drops
//! the body, and the body's drop fires the registered disconnect observer.

use bytes::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const FRAME_BUFFER: usize = 64;

type SenderSlot = Mutex<Option<mpsc::Sender<Bytes>>>;

#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

#[derive(Clone)]
pub struct Connection {
    slot: Arc<SenderSlot>,
}

impl Connection {
    pub fn channel(capacity: usize) -> (Connection, ConnectionBody) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Connection {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        let body = ConnectionBody {
            rx: ReceiverStream::new(rx),
            observer: None,
            finished: false,
        };
        (conn, body)
    }

    pub async fn write(&self, frame: impl Into<Bytes>) -> Result<(), ConnectionClosed> {
        let tx = lock_slot(&self.slot).clone().ok_or(ConnectionClosed)?;
        tx.send(frame.into()).await.map_err(|_| ConnectionClosed)
    }

    /// Ends the body once frames already queued are drained. Idempotent.
    pub fn close(&self) {
        lock_slot(&self.slot).take();
    }

    /// A handle that can close the connection without keeping it alive.
    pub fn closer(&self) -> ConnectionCloser {
        ConnectionCloser {
            slot: Arc::downgrade(&self.slot),
        }
    }
}

pub struct ConnectionCloser {
    slot: Weak<SenderSlot>,
}

impl ConnectionCloser {
    pub fn close(&self) {
        if let Some(slot) = self.slot.upgrade() {
            lock_slot(&slot).take();
        }
    }
}

fn lock_slot(slot: &SenderSlot) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<Bytes>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Response body fed by a [`Connection`].
pub struct ConnectionBody {
    rx: ReceiverStream<Bytes>,
    observer: Option<Box<dyn FnOnce() + Send>>,
    finished: bool,
}

impl ConnectionBody {
    /// Registers a callback run if the body is dropped before it was fully read.
    pub fn on_disconnect(&mut self, observer: impl FnOnce() + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }
}

impl Stream for ConnectionBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => {
                self.finished = true;
                self.observer = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ConnectionBody {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(observer) = self.observer.take() {
            observer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn frames_arrive_in_order_and_close_ends_body() {
        let (conn, mut body) = Connection::channel(8);
        conn.write("a").await.unwrap();
        conn.write(String::from("b")).await.unwrap();
        conn.close();
        conn.close();
        assert!(conn.write("c").await.is_err());
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("a"));
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from("b"));
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_unfinished_body_fires_observer() {
        let (conn, mut body) = Connection::channel(8);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let closer = conn.closer();
        body.on_disconnect(move || {
            flag.store(true, Ordering::SeqCst);
            closer.close();
        });
        conn.write("a").await.unwrap();
        drop(body);
        assert!(fired.load(Ordering::SeqCst));
        assert!(conn.write("b").await.is_err());
    }

    #[tokio::test]
    async fn fully_read_body_does_not_fire_observer() {
        let (conn, mut body) = Connection::channel(8);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        body.on_disconnect(move || flag.store(true, Ordering::SeqCst));
        conn.close();
        assert!(body.next().await.is_none());
        drop(body);
        assert!(!fired.load(Ordering::SeqCst));
    }
}
