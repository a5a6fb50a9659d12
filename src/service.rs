use crate::body::GzipBody;
use crate::future::ResponseFuture;
use crate::handler::{GzipHandler, request_bypass_reason};
use http::{Request, Response};
use http_body::Body;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that gzip compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct GzipService<S> {
    inner: S,
    handler: GzipHandler,
}

impl<S> GzipService<S> {
    /// Creates a new gzip service wrapping the given inner service.
    pub fn new(inner: S, handler: GzipHandler) -> Self {
        Self { inner, handler }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GzipService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body + Unpin,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<GzipBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let handler = match request_bypass_reason(req.headers()) {
            Some(reason) => {
                tracing::trace!(reason, "gzip skipped");
                None
            }
            None => Some(self.handler.clone()),
        };

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, handler)
    }
}
