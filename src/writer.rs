use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode};
use std::io;

/// The response side of an HTTP exchange, as seen by a handler.
///
/// Headers may be changed until the status is committed, either explicitly
/// through [`write_header`] or implicitly (as `200 OK`) by the first
/// [`write`]. Changes made after that point never reach the client.
///
/// [`write_header`]: ResponseWriter::write_header
/// [`write`]: ResponseWriter::write
pub trait ResponseWriter {
    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for modification.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status line and headers.
    fn write_header(&mut self, status: StatusCode);

    /// Writes part of the response body, committing headers first if needed.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Sends any buffered body data to the client.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        (**self).write_header(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for Box<W> {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        (**self).write_header(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Adapts a [`ResponseWriter`] body into [`std::io::Write`].
#[derive(Debug)]
pub struct BodyWriter<'a, W: ?Sized>(&'a mut W);

impl<'a, W: ResponseWriter + ?Sized> BodyWriter<'a, W> {
    /// Wraps a response writer.
    pub fn new(writer: &'a mut W) -> Self {
        Self(writer)
    }
}

impl<W: ResponseWriter + ?Sized> io::Write for BodyWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// An in-memory [`ResponseWriter`] that records what a client would see.
///
/// The header map handed out by [`headers_mut`] stays editable after the
/// status is committed, but [`committed_headers`] and [`into_response`]
/// report the snapshot taken at commit time.
///
/// [`headers_mut`]: ResponseWriter::headers_mut
/// [`committed_headers`]: ResponseRecorder::committed_headers
/// [`into_response`]: ResponseRecorder::into_response
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    headers: HeaderMap,
    committed: Option<(StatusCode, HeaderMap)>,
    interim: Vec<StatusCode>,
    body: BytesMut,
    flushes: usize,
}

impl ResponseRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the status has been committed.
    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// The committed status, or `200 OK` if nothing was written yet.
    pub fn status(&self) -> StatusCode {
        self.committed
            .as_ref()
            .map_or(StatusCode::OK, |(status, _)| *status)
    }

    /// Informational statuses sent ahead of the final one.
    pub fn interim(&self) -> &[StatusCode] {
        &self.interim
    }

    /// The headers as sent to the client.
    ///
    /// Before anything is committed this is the live header map.
    pub fn committed_headers(&self) -> &HeaderMap {
        self.committed
            .as_ref()
            .map_or(&self.headers, |(_, headers)| headers)
    }

    /// The body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Number of times the body was flushed.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Converts the recording into a response.
    pub fn into_response(self) -> Response<Bytes> {
        let (status, headers) = self
            .committed
            .unwrap_or((StatusCode::OK, self.headers));

        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseWriter for ResponseRecorder {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if status.is_informational() {
            self.interim.push(status);
            return;
        }
        if let Some((committed, _)) = &self.committed {
            tracing::warn!(
                status = status.as_u16(),
                committed = committed.as_u16(),
                "superfluous write_header call"
            );
            return;
        }
        self.committed = Some((status, self.headers.clone()));
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.committed.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}
