//! Streaming backpressure via bounded channels.
//!
//! Wraps stream output in a bounded `tokio::sync::mpsc::channel` so that
//! producers block when consumers fall behind. Without this, a fast backend
//! can fill unbounded memory if the consumer is slow (e.g. a visitor on a
//! poor connection).
//!
//! The producer also watches for the consumer going away. When the HTTP
//! client disconnects, the receiving half is dropped and the producer drops
//! the upstream stream immediately, even while it is waiting for the next
//! fragment. Dropping the upstream stream aborts the backend request.
//!
//! # Usage
//!
//! Applied by [`FallbackChain`](super::FallbackChain) to the stream of the
//! candidate that produced the first fragment.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::Result;

/// Default number of items buffered between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Wrap a stream in a bounded channel for backpressure.
///
/// Spawns a producer task that reads from `inner` and sends items
/// through a bounded `mpsc` channel. When the channel is full, the
/// producer blocks until the consumer reads. If the consumer drops
/// the stream, the producer stops and drops `inner`.
///
/// # Panics
///
/// Requires a tokio runtime context (called within an async fn).
pub fn bounded_stream<T: Send + 'static>(
    inner: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
    buffer_size: usize,
) -> Pin<Box<dyn Stream<Item = Result<T>> + Send>> {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer_size.max(1));

    tokio::spawn(async move {
        let mut inner = inner;
        loop {
            let item = tokio::select! {
                _ = tx.closed() => {
                    debug!("stream consumer went away, cancelling upstream");
                    break;
                }
                item = inner.next() => item,
            };
            let Some(item) = item else { break };
            if tx.send(item).await.is_err() {
                break; // receiver dropped
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures_util::stream;

    #[tokio::test]
    async fn forwards_all_items_in_order() {
        let inner = Box::pin(stream::iter(vec![Ok(1), Ok(2), Ok(3)]));
        let out: Vec<i32> = bounded_stream(inner, 2)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![1, 2, 3]);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_consumer_drops_pending_upstream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());

        // First item arrives, then the upstream hangs forever.
        let inner = stream::once(async { Ok::<_, crate::HuginnError>(1) })
            .chain(stream::pending())
            .map(move |item| {
                let _keep = &flag;
                item
            });

        let mut out = bounded_stream(Box::pin(inner), 4);
        assert_eq!(out.next().await.unwrap().unwrap(), 1);
        drop(out);

        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("upstream stream was not dropped after consumer went away");
    }
}
