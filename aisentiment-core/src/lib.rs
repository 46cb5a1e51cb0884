pub mod config;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod telemetry;

pub use error::{CoreResult, ErrorKind, SentimentError};
pub use model::{CallRequest, Outcome, Sentiment, StructuredResult};
pub use orchestrator::CallOrchestrator;
