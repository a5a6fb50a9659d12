use crate::codec::GzipEncoder;
use crate::config::GzipConfig;
use crate::sniff::detect_content_type;
use crate::writer::{BodyWriter, ResponseWriter};
use http::StatusCode;
use http::header::{self, HeaderMap, HeaderValue};
use std::io;

/// Where a response stands with respect to compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing committed, nothing written.
    Pristine,
    /// Headers announce gzip; body bytes go through the encoder.
    Compressing,
    /// Body bytes go straight to the underlying writer.
    Bypassing,
    /// The handler has finalised the response.
    Closed,
}

/// Response writer handed to the downstream handler in place of the real one.
///
/// The first call to [`write`] or [`write_header`] decides, once and for all,
/// whether the body is compressed. That decision sets `Content-Encoding` and
/// `Vary` on the underlying writer's headers before they are committed.
///
/// [`write`]: ResponseWriter::write
/// [`write_header`]: ResponseWriter::write_header
#[derive(Debug)]
pub struct GzipResponseWriter<'a, W: ResponseWriter + ?Sized> {
    inner: &'a mut W,
    encoder: &'a mut GzipEncoder,
    config: &'a GzipConfig,
    state: State,
}

impl<'a, W: ResponseWriter + ?Sized> GzipResponseWriter<'a, W> {
    /// Wraps `inner`. The encoder must have been reset for this response.
    pub fn new(inner: &'a mut W, encoder: &'a mut GzipEncoder, config: &'a GzipConfig) -> Self {
        Self {
            inner,
            encoder,
            config,
            state: State::Pristine,
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// `true` once headers have been committed.
    pub fn wrote_header(&self) -> bool {
        self.state != State::Pristine
    }

    /// `true` if the body bypasses the encoder.
    pub fn skip_compression(&self) -> bool {
        self.state == State::Bypassing
    }

    /// Completes the response after the downstream handler returned.
    ///
    /// Strips `Content-Length` and, if the body was compressed, writes the
    /// gzip trailer. A response that was never written to stays empty.
    pub fn finish(&mut self) -> io::Result<()> {
        self.inner.headers_mut().remove(header::CONTENT_LENGTH);

        let state = std::mem::replace(&mut self.state, State::Closed);
        match state {
            State::Compressing => self.encoder.close(&mut BodyWriter::new(&mut *self.inner)),
            State::Pristine | State::Bypassing | State::Closed => Ok(()),
        }
    }

    fn commit(&mut self, first_chunk: Option<&[u8]>, body_allowed: bool) {
        let compress = prepare_headers(self.inner.headers_mut(), first_chunk, self.config)
            && body_allowed;

        self.state = if compress {
            set_gzip_headers(self.inner.headers_mut());
            State::Compressing
        } else {
            State::Bypassing
        };

        tracing::trace!(state = ?self.state, "response headers committed");
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for GzipResponseWriter<'_, W> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        // An interim status leaves the final one, and the decision, open.
        if self.state == State::Pristine && !status.is_informational() {
            self.commit(None, status_allows_body(status));
        }
        self.inner.write_header(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state == State::Pristine {
            self.commit(Some(buf), true);
        }

        match self.state {
            State::Compressing => self.encoder.write(buf, &mut BodyWriter::new(&mut *self.inner)),
            State::Bypassing => self.inner.write(buf),
            State::Pristine | State::Closed => Err(io::Error::other(
                "write to a response that has already been finished",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state {
            State::Compressing => self.encoder.flush(&mut BodyWriter::new(&mut *self.inner)),
            _ => self.inner.flush(),
        }
    }
}

impl<W: ResponseWriter + ?Sized> Drop for GzipResponseWriter<'_, W> {
    fn drop(&mut self) {
        // `finish` is skipped when the downstream handler unwinds.
        if self.state != State::Closed {
            self.inner.headers_mut().remove(header::CONTENT_LENGTH);
        }
    }
}

/// Fills in `Content-Type` if it is missing and a body chunk is available,
/// then reports whether the resulting type may be compressed.
pub(crate) fn prepare_headers(
    headers: &mut HeaderMap,
    first_chunk: Option<&[u8]>,
    config: &GzipConfig,
) -> bool {
    if let Some(chunk) = first_chunk {
        if !headers.contains_key(header::CONTENT_TYPE) {
            let sniffed = detect_content_type(chunk);
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(sniffed));
        }
    }

    let excluded = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|content_type| config.is_excluded(content_type));

    if excluded {
        tracing::trace!("content type excluded from compression");
    }
    !excluded
}

/// Announces a gzip body. `Content-Length` is dropped since it describes the
/// uncompressed payload.
pub(crate) fn set_gzip_headers(headers: &mut HeaderMap) {
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    headers.remove(header::CONTENT_LENGTH);
    add_vary_accept_encoding(headers);
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let present = headers.get_all(header::VARY).iter().any(|vary| {
        vary.to_str().is_ok_and(|vary| {
            vary.split(',').any(|v| {
                let v = v.trim();
                v == "*" || v.eq_ignore_ascii_case("accept-encoding")
            })
        })
    });

    if !present {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

/// Informational, `204 No Content` and `304 Not Modified` responses carry no
/// body, so there is nothing to compress.
pub(crate) fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
