pub mod config;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod sources;
pub mod util;
pub mod warehouse;

pub use config::Config;
pub use errors::{PipelineError, Result};
pub use models::price::PriceBar;
pub use pipeline::Pipeline;
pub use sources::base::MarketDataSource;
