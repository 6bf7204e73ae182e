//! Configuration module
//!
//! Handles CLI configuration: broker endpoint, work queue and connect timeout.

use anyhow::{Context, Result};
use courier_client::{BrokerEndpoint, DispatchConfig};
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker to connect to
    pub endpoint: BrokerEndpoint,
    /// Work queue shared with the workers
    pub work_queue: String,
    /// Bound on establishing the broker connection
    pub connect_timeout: Duration,
}

impl Config {
    /// Builds and validates the configuration from raw CLI values
    pub fn new(broker_url: &str, work_queue: String, connect_timeout_secs: u64) -> Result<Self> {
        let endpoint = BrokerEndpoint::parse(broker_url).context("Invalid --broker-url")?;

        if work_queue.trim().is_empty() {
            anyhow::bail!("work queue name cannot be empty");
        }
        if connect_timeout_secs == 0 {
            anyhow::bail!("connect timeout must be greater than 0");
        }

        Ok(Self {
            endpoint,
            work_queue,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }

    /// Dispatch settings derived from this configuration
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::new(self.endpoint.clone())
            .with_work_queue(self.work_queue.clone())
            .with_connect_timeout(self.connect_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::new("amqp://localhost", "job_requests".to_string(), 10).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));

        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.work_queue, "job_requests");
        assert_eq!(dispatch.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::new("http://localhost", "job_requests".to_string(), 10).is_err());
        assert!(Config::new("amqp://localhost", "  ".to_string(), 10).is_err());
        assert!(Config::new("amqp://localhost", "job_requests".to_string(), 0).is_err());
    }
}
