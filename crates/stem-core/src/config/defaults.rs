//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "stem.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "stem.yaml";

/// Config file names in search order
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".stem.toml",
        ".stem.yaml",
    ]
}

/// Default configuration rendered as TOML
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default()).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Stem configuration

[runner]
mode = "sequential"
threads = 5

[unit]
host = "127.0.0.1"
port = 5000
powerfullity = 1
workspace = "demo"

[distributor]
host = "127.0.0.1"
port = 5100
units = ["127.0.0.1:5000"]

[network]
io_timeout_secs = 30
"#;
