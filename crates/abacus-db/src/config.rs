use std::env;

/// Database configuration.
///
/// Reads from the `ABACUS_DATABASE_URL` environment variable, falling back
/// to a `abacus.db` file in the working directory when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full SQLite connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "sqlite://abacus.db";

    /// Build a config from the environment.
    ///
    /// Priority: `ABACUS_DATABASE_URL` env var, then the compile-time
    /// default.
    pub fn from_env() -> Self {
        let database_url = env::var("ABACUS_DATABASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Whether the URL points at a transient in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.database_url, "sqlite://abacus.db");
        assert!(!cfg.is_in_memory());
    }

    #[test]
    fn explicit_new() {
        let cfg = DbConfig::new("sqlite:///var/lib/abacus/calc.db");
        assert_eq!(cfg.database_url, "sqlite:///var/lib/abacus/calc.db");
    }

    #[test]
    fn in_memory_detection() {
        let cfg = DbConfig::new("sqlite::memory:");
        assert!(cfg.is_in_memory());
    }
}
