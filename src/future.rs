use crate::body::{GzipBody, Peeked};
use crate::handler::GzipHandler;
use crate::interceptor::{prepare_headers, set_gzip_headers, status_allows_body};
use bytes::{Buf, Bytes};
use http::response::Parts;
use http::{Response, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Future for gzip service responses.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        stage: Stage<B>,
    }
}

enum Stage<B> {
    /// Waiting on the inner service; `None` means the request is not eligible.
    Waiting(Option<GzipHandler>),
    /// No `Content-Type` yet: reading the first frame to sniff one.
    Peeking {
        handler: GzipHandler,
        parts: Parts,
        body: B,
    },
    Done,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, handler: Option<GzipHandler>) -> Self {
        Self {
            inner,
            stage: Stage::Waiting(handler),
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<GzipBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match std::mem::replace(this.stage, Stage::Done) {
                Stage::Waiting(handler) => {
                    let response = match this.inner.as_mut().poll(cx) {
                        Poll::Pending => {
                            *this.stage = Stage::Waiting(handler);
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(response)) => response,
                    };

                    let Some(handler) = handler else {
                        return Poll::Ready(Ok(response.map(GzipBody::passthrough)));
                    };

                    let (parts, body) = response.into_parts();
                    if let Some(reason) = bypass_reason(&parts, &body) {
                        tracing::trace!(reason, "gzip skipped");
                        return Poll::Ready(Ok(Response::from_parts(
                            parts,
                            GzipBody::passthrough(body),
                        )));
                    }

                    if parts.headers.contains_key(header::CONTENT_TYPE) {
                        return Poll::Ready(Ok(wrap_response(parts, body, &handler, None)));
                    }
                    *this.stage = Stage::Peeking {
                        handler,
                        parts,
                        body,
                    };
                }

                Stage::Peeking {
                    handler,
                    parts,
                    mut body,
                } => {
                    let frame = match Pin::new(&mut body).poll_frame(cx) {
                        Poll::Pending => {
                            *this.stage = Stage::Peeking {
                                handler,
                                parts,
                                body,
                            };
                            return Poll::Pending;
                        }
                        Poll::Ready(frame) => frame,
                    };

                    // Nothing to sniff unless the body starts with data.
                    let peeked = match frame {
                        None => Peeked::End,
                        Some(Err(e)) => Peeked::Frame(Err(std::io::Error::other(e.into()))),
                        Some(Ok(frame)) => match frame.into_data() {
                            Ok(mut data) => {
                                let first = data.copy_to_bytes(data.remaining());
                                return Poll::Ready(Ok(wrap_response(
                                    parts,
                                    body,
                                    &handler,
                                    Some(first),
                                )));
                            }
                            Err(frame) => Peeked::Frame(Ok(frame.map_data(|mut data| {
                                data.copy_to_bytes(data.remaining())
                            }))),
                        },
                    };

                    tracing::trace!("gzip skipped: body has no data to sniff");
                    return Poll::Ready(Ok(Response::from_parts(
                        parts,
                        GzipBody::passthrough_peeked(body, peeked),
                    )));
                }

                Stage::Done => panic!("ResponseFuture polled after completion"),
            }
        }
    }
}

/// Decides compression once `Content-Type` is known (or sniffed from
/// `first_chunk`) and wraps the body accordingly.
fn wrap_response<B>(
    mut parts: Parts,
    body: B,
    handler: &GzipHandler,
    first_chunk: Option<Bytes>,
) -> Response<GzipBody<B>> {
    if !prepare_headers(&mut parts.headers, first_chunk.as_deref(), handler.config()) {
        let peeked = first_chunk.map_or(Peeked::Nothing, |chunk| {
            Peeked::Frame(Ok(http_body::Frame::data(chunk)))
        });
        return Response::from_parts(parts, GzipBody::passthrough_peeked(body, peeked));
    }

    // Check for x-accel-buffering: no header or streaming content types
    let always_flush = parts
        .headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"))
        || is_streaming_content_type(&parts.headers);

    set_gzip_headers(&mut parts.headers);

    let mut encoder = handler.pool().lease();
    encoder.reset();

    Response::from_parts(
        parts,
        GzipBody::compressed(body, encoder, first_chunk, always_flush),
    )
}

/// Returns why a response must be sent as-is, if it must.
fn bypass_reason<B: Body>(parts: &Parts, body: &B) -> Option<&'static str> {
    if parts.headers.contains_key(header::CONTENT_ENCODING) {
        Some("response already encoded")
    } else if !status_allows_body(parts.status) {
        Some("status does not allow a body")
    } else if body.is_end_stream() {
        Some("empty body")
    } else {
        None
    }
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GzipConfig;
    use http::StatusCode;
    use http_body_util::{Empty, Full};

    fn poll_now<F: Future>(future: F) -> F::Output {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut future = std::pin::pin!(future);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("future was not ready"),
        }
    }

    fn wrap<B>(response: Response<B>, handler: Option<GzipHandler>) -> Response<GzipBody<B>>
    where
        B: Body + Unpin,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let future = ResponseFuture::new(
            std::future::ready(Ok::<_, std::convert::Infallible>(response)),
            handler,
        );
        match poll_now(future) {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    fn make_response(body: &'static str) -> Response<Full<Bytes>> {
        Response::new(Full::new(Bytes::from_static(body.as_bytes())))
    }

    fn make_response_with_headers<I>(body: &'static str, headers: I) -> Response<Full<Bytes>>
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut response = make_response(body);
        for (name, value) in headers {
            response
                .headers_mut()
                .insert(name, header::HeaderValue::from_static(value));
        }
        response
    }

    fn handler() -> Option<GzipHandler> {
        Some(GzipHandler::new(GzipConfig::default()))
    }

    #[test]
    fn test_compress_sniffs_content_type() {
        let wrapped = wrap(make_response("hello world"), handler());

        assert!(wrapped.body().is_compressed());
        assert_eq!(
            wrapped.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(
            wrapped.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(wrapped.headers().get(header::VARY).unwrap(), "Accept-Encoding");
    }

    #[test]
    fn test_no_compress_when_not_eligible() {
        let wrapped = wrap(make_response("hello world"), None);

        // Should be passthrough
        assert!(!wrapped.body().is_compressed());
        assert!(wrapped.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(wrapped.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_no_compress_when_content_encoding_present() {
        let response =
            make_response_with_headers("hello world", [("content-encoding", "identity")]);
        let wrapped = wrap(response, handler());

        assert!(!wrapped.body().is_compressed());
        assert_eq!(
            wrapped.headers().get(header::CONTENT_ENCODING).unwrap(),
            "identity"
        );
    }

    #[test]
    fn test_no_compress_excluded_content_type() {
        let handler = GzipHandler::new(GzipConfig::default().exclude_content_type("image/png"));
        let response = make_response_with_headers("PNG data", [("content-type", "image/png")]);
        let wrapped = wrap(response, Some(handler));

        assert!(!wrapped.body().is_compressed());
        assert!(wrapped.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_no_compress_sniffed_excluded_type() {
        let handler = GzipHandler::new(GzipConfig::default().exclude_content_type("image/gif"));
        let wrapped = wrap(make_response("GIF89a...."), Some(handler));

        assert!(!wrapped.body().is_compressed());
        assert_eq!(wrapped.headers().get(header::CONTENT_TYPE).unwrap(), "image/gif");
        assert!(wrapped.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_no_compress_no_content() {
        let mut response = make_response_with_headers("", [("content-type", "text/plain")]);
        *response.status_mut() = StatusCode::NO_CONTENT;
        let wrapped = wrap(response, handler());

        assert!(!wrapped.body().is_compressed());
    }

    #[test]
    fn test_no_compress_empty_body() {
        let response = Response::new(Empty::<Bytes>::new());
        let wrapped = wrap(response, handler());

        assert!(!wrapped.body().is_compressed());
        assert!(wrapped.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_content_length_removed() {
        let response = make_response_with_headers(
            "large enough content",
            [("content-length", "20"), ("content-type", "text/plain")],
        );
        let wrapped = wrap(response, handler());

        assert!(wrapped.body().is_compressed());
        assert!(wrapped.headers().get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_always_flush_when_x_accel_buffering_no() {
        let response = make_response_with_headers("streaming data", [("x-accel-buffering", "NO")]);
        let wrapped = wrap(response, handler());

        match wrapped.body() {
            GzipBody::Compressed { state, .. } => assert!(state.always_flush()),
            _ => panic!("Expected compressed body"),
        }
    }

    #[test]
    fn test_always_flush_text_event_stream() {
        let response = make_response_with_headers(
            "event: data\n\n",
            [("content-type", "text/event-stream; charset=utf-8")],
        );
        let wrapped = wrap(response, handler());

        match wrapped.body() {
            GzipBody::Compressed { state, .. } => assert!(state.always_flush()),
            _ => panic!("Expected compressed body"),
        }
    }

    #[test]
    fn test_no_always_flush_by_default() {
        let wrapped = wrap(make_response("normal data"), handler());

        match wrapped.body() {
            GzipBody::Compressed { state, .. } => assert!(!state.always_flush()),
            _ => panic!("Expected compressed body"),
        }
    }

    #[test]
    fn test_vary_header_star_not_modified() {
        let response = make_response_with_headers("hello world", [("vary", "*")]);
        let wrapped = wrap(response, handler());

        assert_eq!(wrapped.headers().get(header::VARY).unwrap(), "*");
    }

    #[test]
    fn test_inner_error_passes_through() {
        let future = ResponseFuture::<_, Full<Bytes>>::new(
            std::future::ready(Err::<Response<Full<Bytes>>, _>("boom")),
            handler(),
        );
        match poll_now(future) {
            Err(e) => assert_eq!(e, "boom"),
            Ok(_) => panic!("Expected the inner error"),
        }
    }
}
