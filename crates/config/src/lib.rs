//! Configuration tree, `${var}` interpolation and multi-format loading.
//!
//! The tree is a plain JSON value. Connectors, senders and receivers live
//! under `connectors.<name>`, `senders.<name>` and `receivers.<name>`,
//! optionally nested below a top-level `switchyard` key.
//!
//! Config files: `.toml`, `.yaml`/`.yml` or `.json`.

pub mod interpolate;
pub mod loader;
pub mod settings;
pub mod tree;

pub use {
    interpolate::{interpolate, substitute_vars},
    loader::{load_config_file, load_tree, load_vars_file},
    settings::SettingsExt,
    tree::{ConfigMap, Section, SwitchyardConfig, Vars},
};
