//! Server endpoint and credentials.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of attempts a server command gets before a retryable failure
/// is reported to the caller.
pub const RETRY_COUNT: usize = 100;

/// How to reach one database server.
///
/// A configuration is usable when it names either a host or a local
/// socket; see [`Config::is_valid`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    pub unix_socket: String,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn unix_socket(mut self, path: &str) -> Self {
        self.unix_socket = path.to_string();
        self
    }

    /// True when a host or a unix socket path is set.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() || !self.unix_socket.is_empty()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn validate(self) -> Result<Self> {
        if !self.is_valid() {
            return Err(Error::Config(
                "either host or unix_socket must be set".to_string(),
            ));
        }
        Ok(self)
    }

    /// Connection settings appended to connect errors. Never includes
    /// the password.
    pub(crate) fn error_context(&self) -> Option<String> {
        let rendered = self.to_string();
        if rendered.is_empty() {
            None
        } else {
            Some(format!(";\n{rendered}"))
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = (self.port != 0).then(|| self.port.to_string());
        let fields = [
            ("host", Some(self.host.as_str())),
            ("port", port.as_deref()),
            ("socket", Some(self.unix_socket.as_str())),
            ("db", Some(self.database.as_str())),
            ("user", Some(self.user.as_str())),
        ];

        let mut first = true;
        for (name, value) in fields {
            match value {
                Some(v) if !v.is_empty() => {
                    if !first {
                        f.write_str(";\n")?;
                    }
                    write!(f, "{name}: '{v}'")?;
                    first = false;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("port", &self.port)
            .field("unix_socket", &self.unix_socket)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(!Config::new().is_valid());
        assert!(Config::new().host("localhost").is_valid());
        assert!(Config::new()
            .unix_socket("/var/run/mysqld/mysqld.sock")
            .is_valid());
        assert!(!Config::new().user("root").database("test").is_valid());
    }

    #[test]
    fn test_display_masks_password() {
        let config = Config::new()
            .host("db1")
            .port(3306)
            .user("root")
            .password("hunter2")
            .database("shop");

        let rendered = config.to_string();
        assert_eq!(rendered, "host: 'db1';\nport: '3306';\ndb: 'shop';\nuser: 'root'");
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_error_context() {
        assert_eq!(Config::new().error_context(), None);
        assert_eq!(
            Config::new().unix_socket("/tmp/s").error_context().as_deref(),
            Some(";\nsocket: '/tmp/s'")
        );
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json_str(
            r#"{"host": "localhost", "port": 3306, "user": "app", "database": "INFORMATION_SCHEMA"}"#,
        )
        .unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.user, "app");
        assert!(config.password.is_empty());
        assert!(config.unix_socket.is_empty());
    }

    #[test]
    fn test_from_json_requires_endpoint() {
        let err = Config::from_json_str(r#"{"user": "app"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_json_str("not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
