//! Configuration loading for lectern.
//!
//! Config files: `lectern.toml`, `lectern.yaml`, or `lectern.json`
//! Searched in `./` then the user config dir (`~/.config/lectern/`).
//!
//! Instance credentials can be overridden per field with
//! `LECTERN_<INSTANCE>_{BASE_URL,CLIENT_ID,CLIENT_SECRET}`.

pub mod loader;
pub mod schema;

pub use {
    loader::{
        config_dir, discover_and_load, load_config, resolve_instance, set_config_dir, tokens_dir,
    },
    schema::{AuthConfig, FlowMode, InstanceConfig, LecternConfig, StorageBackend},
};
