pub mod loader;
pub mod schema;

pub use loader::{builtin_config, load_config, load_config_from_str};
pub use schema::{Config, ContextRule, ModelConfig, PatternRule, PolicyConfig, VendorRule};
