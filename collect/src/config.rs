use std::net::SocketAddr;

use envconfig::Envconfig;
use thiserror::Error;

use crate::api::Violation;

#[derive(Envconfig, Debug, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    /// Prefix for every exposed route, e.g. "/cdp". Empty means no prefix.
    #[envconfig(default = "")]
    pub prefix: String,

    /// Include the event context in HTTP responses.
    #[envconfig(default = "true")]
    pub show_meta: bool,

    /// Include the event data in HTTP responses. Disable when payloads can
    /// carry sensitive values.
    #[envconfig(default = "true")]
    pub show_data: bool,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

#[derive(Error, Debug)]
#[error("invalid configuration ({} violation(s))", .violations.len())]
pub struct ConfigError {
    pub violations: Vec<Violation>,
}

impl Config {
    /// Unlike per-event validation, every violation is accumulated before
    /// returning. Invalid options are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if !self.prefix.is_empty() {
            if !self.prefix.starts_with('/') {
                violations.push(Violation::new(
                    "prefix must start with a '/'",
                    &["options", "prefix"],
                ));
            }
            if self.prefix.ends_with('/') {
                violations.push(Violation::new(
                    "prefix must not end with a '/'",
                    &["options", "prefix"],
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_prefix(prefix: &str) -> Config {
        Config {
            address: "127.0.0.1:0".parse().unwrap(),
            prefix: prefix.to_string(),
            show_meta: true,
            show_data: true,
            export_prometheus: false,
        }
    }

    #[test]
    fn empty_prefix_is_allowed() {
        assert!(config_with_prefix("").validate().is_ok());
    }

    #[test]
    fn prefix_with_leading_slash_is_allowed() {
        assert!(config_with_prefix("/cdp").validate().is_ok());
    }

    #[test]
    fn prefix_without_leading_slash_is_rejected() {
        let err = config_with_prefix("cdp").validate().unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].path, vec!["options", "prefix"]);
    }

    #[test]
    fn prefix_with_trailing_slash_is_rejected() {
        assert!(config_with_prefix("/cdp/").validate().is_err());
    }

    #[test]
    fn all_violations_are_accumulated() {
        let err = config_with_prefix("cdp/").validate().unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }
}
