//! Configuration: discovery of `cachegate.{toml,yaml,yml,json}`, `${VAR}`
//! substitution, and the config schema.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, find_config_file, load_config},
    schema::{CachegateConfig, GatewayConfig},
};
