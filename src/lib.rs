pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod translate;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use logging::SharedLogger;
pub use registry::{Model, ModelRegistry};
pub use server::{build_router, AppState};
