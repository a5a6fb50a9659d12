use crate::config::{GzipConfig, Level};
use crate::error::Result;
use crate::interceptor::GzipResponseWriter;
use crate::pool::EncoderPool;
use crate::writer::ResponseWriter;
use http::Request;
use http::header::{self, HeaderMap};
use std::io;
use std::sync::Arc;

/// Gzip middleware for handlers written against [`ResponseWriter`].
///
/// Cloning is cheap: clones share the configuration and the encoder pool.
#[derive(Debug, Clone)]
pub struct GzipHandler {
    config: Arc<GzipConfig>,
    pool: Arc<EncoderPool>,
}

impl GzipHandler {
    /// Creates a handler with the given configuration.
    pub fn new(config: GzipConfig) -> Self {
        tracing::debug!(
            level = config.compression_level().get(),
            excluded = config.excluded_content_types().len(),
            "gzip middleware configured"
        );

        let pool = Arc::new(EncoderPool::new(config.compression_level()));
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    /// Creates a handler from a raw level, rejecting values outside `-1..=9`.
    pub fn with_level(level: i32) -> Result<Self> {
        Ok(Self::new(GzipConfig::new(Level::new(level)?)))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GzipConfig {
        &self.config
    }

    /// Returns the encoder pool shared by all requests.
    pub fn pool(&self) -> &Arc<EncoderPool> {
        &self.pool
    }

    /// Runs `next`, compressing what it writes when the client accepts gzip.
    ///
    /// Requests that do not advertise gzip, WebSocket handshakes and
    /// responses already marked `Content-Encoding: gzip` are forwarded with
    /// the original writer. The returned error comes from finishing the gzip
    /// stream; errors from individual writes are reported to `next` itself.
    pub fn serve<B, W, F>(&self, req: &Request<B>, w: &mut W, next: F) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
        F: FnOnce(&mut dyn ResponseWriter, &Request<B>),
    {
        if let Some(reason) = bypass_reason(req.headers(), w.headers()) {
            tracing::trace!(reason, "gzip skipped");
            next(&mut BypassWriter(w), req);
            return Ok(());
        }

        let mut encoder = self.pool.lease();
        encoder.reset();

        let mut gzip_writer = GzipResponseWriter::new(w, &mut encoder, &self.config);
        next(&mut gzip_writer, req);
        gzip_writer.finish()
    }
}

/// Lets a possibly unsized writer be handed out as `&mut dyn ResponseWriter`.
struct BypassWriter<'a, W: ?Sized>(&'a mut W);

impl<W: ResponseWriter + ?Sized> ResponseWriter for BypassWriter<'_, W> {
    fn headers(&self) -> &HeaderMap {
        self.0.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.0.headers_mut()
    }

    fn write_header(&mut self, status: http::StatusCode) {
        self.0.write_header(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Returns why a request must not be compressed, if it must not.
pub(crate) fn bypass_reason(request: &HeaderMap, response: &HeaderMap) -> Option<&'static str> {
    request_bypass_reason(request).or_else(|| {
        response
            .get(header::CONTENT_ENCODING)
            .is_some_and(|v| v == "gzip")
            .then_some("response already gzip encoded")
    })
}

/// The part of [`bypass_reason`] that only depends on the request.
pub(crate) fn request_bypass_reason(request: &HeaderMap) -> Option<&'static str> {
    if !accepts_gzip(request) {
        Some("client does not accept gzip")
    } else if is_websocket_handshake(request) {
        Some("websocket handshake")
    } else {
        None
    }
}

/// Substring match on `Accept-Encoding`; quality values are not parsed.
pub(crate) fn accepts_gzip(request: &HeaderMap) -> bool {
    request
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .any(|v| v.to_str().is_ok_and(|v| v.contains("gzip")))
}

pub(crate) fn is_websocket_handshake(request: &HeaderMap) -> bool {
    request
        .get(header::SEC_WEBSOCKET_KEY)
        .is_some_and(|key| !key.is_empty())
}
