use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for the supported data destinations.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// ClickHouse destination reached over HTTP(S).
    ClickHouse {
        /// ClickHouse HTTP(S) endpoint (e.g. `http://localhost:8123`).
        url: String,
        /// ClickHouse user name.
        user: String,
        /// ClickHouse user password.
        password: Option<SecretString>,
        /// ClickHouse target database.
        database: String,
    },
}
