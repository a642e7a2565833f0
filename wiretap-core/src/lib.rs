pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod sanitize;

pub use config::WiretapConfig;
pub use error::CoreError;
pub use model::{
    BodyCapture, EndpointSummary, LogRecord, MimeCounts, RequestPart, ResponsePart, RouteCatalog,
    RouteReport, SessionMeta,
};
