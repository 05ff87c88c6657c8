pub mod exporter;
pub mod fetcher;
pub mod loader;
pub mod quality;
pub mod transformer;
