use crate::config::GzipConfig;
use crate::error::Result;
use crate::handler::GzipHandler;
use crate::service::GzipService;
use tower::Layer;

/// A Tower layer that gzip compresses HTTP response bodies.
///
/// All services produced by one layer share its encoder pool.
#[derive(Debug, Clone)]
pub struct GzipLayer {
    handler: GzipHandler,
}

impl GzipLayer {
    /// Creates a new gzip layer with the given configuration.
    pub fn new(config: GzipConfig) -> Self {
        Self {
            handler: GzipHandler::new(config),
        }
    }

    /// Creates a layer from a raw compression level.
    pub fn with_level(level: i32) -> Result<Self> {
        GzipHandler::with_level(level).map(Self::from)
    }
}

impl Default for GzipLayer {
    fn default() -> Self {
        Self::new(GzipConfig::default())
    }
}

impl From<GzipHandler> for GzipLayer {
    fn from(handler: GzipHandler) -> Self {
        Self { handler }
    }
}

impl<S> Layer<S> for GzipLayer {
    type Service = GzipService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GzipService::new(inner, self.handler.clone())
    }
}
