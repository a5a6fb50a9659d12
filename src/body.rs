use crate::pool::PooledEncoder;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024;

pin_project! {
    /// A response body that may be gzip compressed.
    ///
    /// This type wraps an inner body and either streams it through a pooled
    /// gzip encoder or passes it through unchanged.
    #[project = GzipBodyProj]
    #[allow(missing_docs)]
    pub enum GzipBody<B> {
        /// Compressed body with a leased encoder.
        Compressed {
            #[pin]
            inner: B,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
            peeked: Peeked,
        },
    }
}

/// A frame read from the inner body before the response was returned.
#[derive(Debug, Default)]
pub(crate) enum Peeked {
    #[default]
    Nothing,
    Frame(Result<Frame<Bytes>, io::Error>),
    End,
}

/// Encoder lease and output buffer of a compressed body.
#[derive(Debug)]
pub(crate) struct CompressedBody {
    encoder: Option<PooledEncoder>,
    output: BytesMut,
    pending: Option<Bytes>,
    always_flush: bool,
    state: CompressState,
    pending_trailers: Option<HeaderMap>,
}

/// Where a compressed body is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompressState {
    /// Feeding inner data frames to the encoder.
    Reading,
    /// Writing the gzip trailer after inner body is done.
    Finishing,
    /// Forwarding trailers held back until the gzip trailer was written.
    Trailers,
    /// Everything has been emitted.
    Done,
}

impl CompressedBody {
    fn new(encoder: PooledEncoder, first_chunk: Option<Bytes>, always_flush: bool) -> Self {
        Self {
            encoder: Some(encoder),
            output: BytesMut::with_capacity(OUTPUT_BUFFER_SIZE),
            pending: first_chunk,
            always_flush,
            state: CompressState::Reading,
            pending_trailers: None,
        }
    }

    /// Returns the current compression state.
    pub(crate) fn state(&self) -> CompressState {
        self.state
    }

    /// Returns whether every chunk is flushed to the client.
    #[cfg(test)]
    pub(crate) fn always_flush(&self) -> bool {
        self.always_flush
    }

    /// Drives the inner body through the encoder.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.state {
                CompressState::Done => return Poll::Ready(None),

                CompressState::Trailers => {
                    self.state = CompressState::Done;
                    return Poll::Ready(
                        self.pending_trailers
                            .take()
                            .map(|t| Ok(Frame::trailers(t))),
                    );
                }

                CompressState::Finishing => {
                    self.state = if self.pending_trailers.is_some() {
                        CompressState::Trailers
                    } else {
                        CompressState::Done
                    };
                    if let Err(e) = self.finish() {
                        return Poll::Ready(Some(Err(e)));
                    }
                    if let Some(frame) = self.take_output() {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                }

                CompressState::Reading => {
                    if let Some(chunk) = self.pending.take() {
                        if let Err(e) = self.compress_chunk(&chunk) {
                            return Poll::Ready(Some(Err(e)));
                        }
                        if let Some(frame) = self.take_output() {
                            return Poll::Ready(Some(Ok(frame)));
                        }
                        continue;
                    }

                    match ready!(inner.as_mut().poll_frame(cx)) {
                        None => self.state = CompressState::Finishing,
                        Some(Err(e)) => return Poll::Ready(Some(Err(io::Error::other(e.into())))),
                        Some(Ok(frame)) => match frame.into_data() {
                            Ok(mut data) => {
                                while data.has_remaining() {
                                    let chunk = data.chunk();
                                    let len = chunk.len();
                                    if let Err(e) = self.compress_chunk(chunk) {
                                        return Poll::Ready(Some(Err(e)));
                                    }
                                    data.advance(len);
                                }
                                if let Some(frame) = self.take_output() {
                                    return Poll::Ready(Some(Ok(frame)));
                                }
                            }
                            Err(frame) => {
                                if let Ok(trailers) = frame.into_trailers() {
                                    // Buffer trailers and finish compression first
                                    self.pending_trailers = Some(trailers);
                                    self.state = CompressState::Finishing;
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    /// Compresses a chunk of input data into the output buffer.
    fn compress_chunk(&mut self, input: &[u8]) -> io::Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(io::Error::other("gzip stream already finished"));
        };

        let mut sink = (&mut self.output).writer();
        encoder.write(input, &mut sink)?;
        if self.always_flush {
            encoder.flush(&mut sink)?;
        }
        Ok(())
    }

    /// Writes the gzip trailer and hands the encoder back to its pool.
    fn finish(&mut self) -> io::Result<()> {
        match self.encoder.take() {
            Some(mut encoder) => encoder.close(&mut (&mut self.output).writer()),
            None => Ok(()),
        }
    }

    fn take_output(&mut self) -> Option<Frame<Bytes>> {
        if self.output.is_empty() {
            None
        } else {
            Some(Frame::data(self.output.split().freeze()))
        }
    }
}

impl<B> GzipBody<B> {
    /// Creates a body compressed with a leased encoder.
    ///
    /// `first_chunk` is data already taken from `inner`; it is compressed
    /// before anything else.
    pub(crate) fn compressed(
        inner: B,
        encoder: PooledEncoder,
        first_chunk: Option<Bytes>,
        always_flush: bool,
    ) -> Self {
        Self::Compressed {
            inner,
            state: CompressedBody::new(encoder, first_chunk, always_flush),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough {
            inner,
            peeked: Peeked::Nothing,
        }
    }

    /// Creates a passthrough body that replays a frame read ahead of time.
    pub(crate) fn passthrough_peeked(inner: B, peeked: Peeked) -> Self {
        Self::Passthrough { inner, peeked }
    }

    /// Returns `true` if the body is being compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self, GzipBody::Compressed { .. })
    }
}

impl<B> Body for GzipBody<B>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            GzipBodyProj::Passthrough { inner, peeked } => {
                match std::mem::take(peeked) {
                    Peeked::Frame(frame) => return Poll::Ready(Some(frame)),
                    Peeked::End => {
                        *peeked = Peeked::End;
                        return Poll::Ready(None);
                    }
                    Peeked::Nothing => {}
                }

                // Pass through frames, converting data to Bytes
                match ready!(inner.poll_frame(cx)) {
                    None => Poll::Ready(None),
                    Some(Ok(frame)) => Poll::Ready(Some(Ok(
                        frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
                    ))),
                    Some(Err(e)) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
                }
            }
            GzipBodyProj::Compressed { inner, state } => state.poll_compressed(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            GzipBody::Passthrough { inner, peeked } => match peeked {
                Peeked::Nothing => inner.is_end_stream(),
                Peeked::Frame(_) => false,
                Peeked::End => true,
            },
            GzipBody::Compressed { state, .. } => state.state() == CompressState::Done,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            GzipBody::Passthrough {
                inner,
                peeked: Peeked::Nothing,
            } => inner.size_hint(),
            GzipBody::Passthrough {
                peeked: Peeked::End,
                ..
            } => SizeHint::with_exact(0),
            // Compressed size is unknown
            _ => SizeHint::default(),
        }
    }
}
