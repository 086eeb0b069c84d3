pub mod config;
pub mod logger;
pub mod passphrase;
pub mod settings_toml;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use passphrase::get_passphrase;
pub use settings_toml::{SettingsToml, apply_file_to_opts, catalog_from_file, load_settings_toml};
