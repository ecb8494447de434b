//! Response relay.
//!
//! # Responsibilities
//! - Copy the upstream status and every header entry onto the client response
//! - Stream the upstream body through unchanged
//! - Report mid-stream body failures to the observer hooks
//!
//! # Design Decisions
//! - Duplicate header names stay separate entries, never merged
//! - Size hints and trailers pass through, so Content-Length framing survives
//! - A failed body ends the stream; hyper then aborts only that connection

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::http::request::RequestSummary;
use crate::observability::Hooks;
use crate::upstream::UpstreamResponse;

/// Build the client-facing response from the origin's reply.
pub fn relay_response(upstream: UpstreamResponse, request: RequestSummary, hooks: Hooks) -> Response<Body> {
    let (status, headers, body) = upstream.into_parts();

    let mut response = Response::new(Body::new(RelayedBody {
        inner: body,
        request,
        hooks,
        relayed: 0,
        done: false,
    }));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Upstream body on its way to the client.
struct RelayedBody {
    inner: Body,
    request: RequestSummary,
    hooks: Hooks,
    relayed: u64,
    done: bool,
}

impl HttpBody for RelayedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.relayed += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                this.hooks.on_body_error(&this.request, &e);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                tracing::trace!(url = %this.request.url, bytes = this.relayed, "Upstream body relayed");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RelayedBody {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(
                url = %self.request.url,
                bytes = self.relayed,
                "Client went away before upstream body finished, releasing it"
            );
        }
    }
}
