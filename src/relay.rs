//! Streams non-HTML upstream bodies to the client without buffering them

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures_util::Stream;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    accounting::{ActiveConnection, RequestRecord, RequestRecorder},
    classify::Classification,
    headers::{apply_cors, forward_response_headers},
    upstream::{BodyStream, UpstreamResponse},
};

/// What to write to the request log once the transfer ends.
pub struct TransferContext {
    pub method: String,
    pub url: String,
    pub started: Instant,
    pub recorder: Arc<dyn RequestRecorder>,
    pub connection: ActiveConnection,
}

/// Build the client response for a non-HTML upstream body. Bytes flow chunk by
/// chunk as the client reads them; accounting happens when the stream ends,
/// fails, or is dropped by a disconnecting client.
pub fn relay(upstream: UpstreamResponse, classification: &Classification, ctx: TransferContext) -> Response {
    let status = upstream.status;
    let mut headers = forward_response_headers(&upstream.headers, &ctx.url);
    if let Some(content_type) = &classification.content_type_override {
        headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    apply_cors(&mut headers);

    debug!(url = %ctx.url, status = %status, kind = ?classification.kind, "Relaying upstream body");

    let body = MeteredStream::new(upstream.into_stream(), status.as_u16(), ctx);
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Passes upstream chunks through while counting them.
pub struct MeteredStream {
    inner: BodyStream,
    status: u16,
    bytes: u64,
    ctx: Option<TransferContext>,
}

impl MeteredStream {
    pub fn new(inner: BodyStream, status: u16, ctx: TransferContext) -> Self {
        Self {
            inner,
            status,
            bytes: 0,
            ctx: Some(ctx),
        }
    }

    fn finish(&mut self, failed: bool) {
        // Dropping the context also releases the active connection.
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        if failed {
            ctx.recorder.increment_error_count();
        }
        ctx.recorder.add_data_transferred(self.bytes);
        // The client already has the upstream status; the log shows the broken transfer
        let status = if failed {
            StatusCode::INTERNAL_SERVER_ERROR.as_u16()
        } else {
            self.status
        };
        ctx.recorder.record_request(RequestRecord {
            method: ctx.method,
            url: ctx.url,
            status,
            size: self.bytes,
            duration_ms: ctx.started.elapsed().as_millis() as u64,
        });
    }
}

impl Stream for MeteredStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(ctx) = &this.ctx {
                    warn!(url = %ctx.url, bytes = this.bytes, error = %err, "Upstream stream failed mid-transfer");
                }
                this.finish(true);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish(false);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        if let Some(ctx) = &self.ctx {
            debug!(url = %ctx.url, bytes = self.bytes, "Client went away before transfer completed");
        }
        self.finish(false);
    }
}
