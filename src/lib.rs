//! Gzip compression middleware for HTTP responses.
//!
//! This crate compresses response bodies with gzip when the client accepts
//! it. Encoders are pooled and reused across requests, so a busy server does
//! not allocate a fresh deflate state per response.
//!
//! Two front ends share the same rules:
//! - [`GzipHandler::serve`] wraps a handler written against the
//!   [`ResponseWriter`] trait.
//! - [`GzipLayer`] is a Tower layer (feature `tower`, enabled by default).
//!
//! # Example
//!
//! ```ignore
//! use gzip_response::{GzipConfig, GzipLayer, Level};
//! use tower::ServiceBuilder;
//!
//! let config = GzipConfig::new(Level::BEST).exclude_content_type("image/png");
//! let service = ServiceBuilder::new()
//!     .layer(GzipLayer::new(config))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - `Accept-Encoding` does not contain `gzip`
//! - `Sec-WebSocket-Key` is present (WebSocket handshake)
//! - `Content-Encoding: gzip` is already set
//! - `Content-Type` is one of the excluded content types
//! - the status does not allow a body (`1xx`, `204`, `304`)
//!
//! A missing `Content-Type` is sniffed from the first chunk of the body
//! before the exclusion list is consulted.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to `gzip`
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Vary` header includes `Accept-Encoding`

#![deny(missing_docs)]

mod codec;
mod config;
mod error;
mod handler;
mod interceptor;
mod pool;
mod sniff;
mod writer;

#[cfg(feature = "tower")]
mod body;
#[cfg(feature = "tower")]
mod future;
#[cfg(feature = "tower")]
mod layer;
#[cfg(feature = "tower")]
mod service;

pub use codec::GzipEncoder;
pub use config::{
    BEST_COMPRESSION, BEST_SPEED, ContentTypeMatch, DEFAULT_COMPRESSION, GzipConfig, Level,
    NO_COMPRESSION,
};
pub use error::{Error, Result};
pub use handler::GzipHandler;
pub use interceptor::{GzipResponseWriter, State};
pub use pool::{DEFAULT_MAX_IDLE, EncoderPool, PooledEncoder};
pub use sniff::{SNIFF_LEN, detect_content_type};
pub use writer::{BodyWriter, ResponseRecorder, ResponseWriter};

#[cfg(feature = "tower")]
pub use body::GzipBody;
#[cfg(feature = "tower")]
pub use future::ResponseFuture;
#[cfg(feature = "tower")]
pub use layer::GzipLayer;
#[cfg(feature = "tower")]
pub use service::GzipService;
