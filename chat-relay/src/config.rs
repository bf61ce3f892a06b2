use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Settings for one [`crate::server::ChatServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface the listener binds to.
    pub bind: IpAddr,
    /// Listening port. 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// How long `stop` waits for session tasks before aborting them.
    pub grace_period: Duration,
    /// Upper bound for a single per-recipient write during a broadcast.
    /// `None` keeps writes unbounded, so one stalled client delays the rest
    /// of that broadcast round.
    pub send_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            grace_period: DEFAULT_GRACE_PERIOD,
            send_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Result<Self, ConfigError> {
        if grace_period.is_zero() {
            return Err(ConfigError::ZeroGracePeriod);
        }
        self.grace_period = grace_period;
        Ok(self)
    }

    pub fn with_send_timeout(mut self, send_timeout: Option<Duration>) -> Result<Self, ConfigError> {
        if send_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(ConfigError::ZeroSendTimeout);
        }
        self.send_timeout = send_timeout;
        Ok(self)
    }
}

/// Parses operator-entered port text. Surrounding whitespace is ignored.
pub fn parse_port(input: &str) -> Result<u16, ConfigError> {
    input
        .trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort {
            input: input.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ports_with_surrounding_whitespace() {
        assert_eq!(parse_port("5000"), Ok(5000));
        assert_eq!(parse_port(" 8080\n"), Ok(8080));
        assert_eq!(parse_port("0"), Ok(0));
    }

    #[test]
    fn rejects_non_numeric_and_out_of_range_ports() {
        for input in ["", "   ", "abc", "-1", "65536", "50 00"] {
            assert_eq!(
                parse_port(input),
                Err(ConfigError::InvalidPort {
                    input: input.to_string()
                }),
                "input {input:?} should be rejected"
            );
        }
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr(), "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.send_timeout, None);
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert_eq!(
            ServerConfig::default().with_grace_period(Duration::ZERO),
            Err(ConfigError::ZeroGracePeriod)
        );
        assert_eq!(
            ServerConfig::default().with_send_timeout(Some(Duration::ZERO)),
            Err(ConfigError::ZeroSendTimeout)
        );
        assert!(ServerConfig::default().with_send_timeout(None).is_ok());
    }
}
