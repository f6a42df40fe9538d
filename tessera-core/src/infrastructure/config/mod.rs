mod loader;
mod types;
mod validation;

pub use loader::load_config;
pub use types::{AppConfig, ChainNode, CosignerEntry, SignMode, ThresholdSection};
pub use validation::validate_config;
