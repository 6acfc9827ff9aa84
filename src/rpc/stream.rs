//! A tonic response stream with a guaranteed cleanup hook, generalized from
//! the `stream!`-plus-`Drop` pattern gRPC servers use to notice client
//! disconnects and cancellations: a stream adapter can't tell the difference
//! between "the client read everything and hung up" and "the client went
//! away mid-read" from inside the generator body, but both end the same way
//! — the stream gets dropped. Attaching the cleanup to `Drop` rather than to
//! the generator's fall-through means it runs either way.

use std::pin::Pin;
use std::task::{Context, Poll};
use tonic::Status;

use futures::stream::Stream;

/// Boxed pinned stream plus a one-shot cleanup closure invoked on `Drop`.
/// Used by the streaming RPCs (`MutationInit`, `EventInit`, `DiscoveryInit`)
/// to unsubscribe from the Event Bus the moment the client stops reading,
/// rather than leaking a listener that will only ever fail its next send.
pub struct GatewayStream<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> GatewayStream<T> {
    pub fn new<S>(stream: S, on_drop: impl FnOnce() + Send + 'static) -> Self
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
    {
        GatewayStream {
            inner: Box::pin(stream),
            on_drop: Some(Box::new(on_drop)),
        }
    }
}

impl<T> Stream for GatewayStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Drop for GatewayStream<T> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.on_drop.take() {
            cleanup();
        }
    }
}
