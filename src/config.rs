use serde::Deserialize;

pub const DEFAULT_HOST: &str = "https://crash-stats.mozilla.org";

/// TOML configuration for the crash-stats API. Command-line arguments take
/// precedence over values from the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The crash-stats API host.
    pub host: Option<String>,
    /// The API token sent in the Auth-Token header. Without a token only
    /// public crash data is available.
    pub api_token: Option<String>,
}
