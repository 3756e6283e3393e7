//! Application settings: an uppercase-keyed mapping with typed accessors,
//! plus loading from `doozer.toml`, `doozer.yaml` or `doozer.json`.
//!
//! Files are searched in `./` then the user config directory and support
//! `${ENV_VAR}` substitution. `DOOZER_*` environment variables override
//! file values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod settings;

pub use {
    error::{Error, Result},
    loader::{discover, load_settings},
    settings::Settings,
};
