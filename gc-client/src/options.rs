//! Client configuration.
//!
//! Options are owned by the facade and changed by shallow overlay:
//! [`Options::overlay`] takes a sparse [`OptionsUpdate`] and returns a new
//! `Options` with only the given fields replaced.

use std::time::Duration;

use crate::backoff::{Backoff, Growth};

/// A fully-populated options record; every field has a value at all times.
#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub backoff_growth: Growth,
    pub backoff_initial_delay: Duration,
    pub backoff_max_delay: Duration,
    pub backoff_randomisation_factor: f64,
    pub backoff_fail_after: Option<u32>,
    pub connection_timeout: Duration,
    pub queue_timeout: Duration,
    pub send_timeout: Duration,
    pub retry_interval: Duration,
    pub tcp_keep_alive: bool,
    pub tcp_keep_alive_initial_delay: Duration,
}

impl Options {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            reconnect: true,
            reconnect_delay: Duration::from_millis(1000),
            backoff_growth: Growth::Exponential,
            backoff_initial_delay: Duration::from_millis(500),
            backoff_max_delay: Duration::from_secs(30),
            backoff_randomisation_factor: 0.2,
            backoff_fail_after: None,
            connection_timeout: Duration::from_secs(5),
            queue_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(250),
            tcp_keep_alive: true,
            tcp_keep_alive_initial_delay: Duration::from_secs(30),
        }
    }

    pub fn backoff(&self) -> Backoff {
        let mut b = Backoff::new(self.backoff_growth, self.backoff_initial_delay, self.backoff_max_delay)
            .with_randomisation_factor(self.backoff_randomisation_factor);
        if let Some(fail_after) = self.backoff_fail_after {
            b = b.with_fail_after(fail_after);
        }
        b
    }

    /// Apply a sparse update in place.
    pub fn apply(&mut self, update: OptionsUpdate) {
        if let Some(v) = update.host {
            self.host = v;
        }
        if let Some(v) = update.port {
            self.port = v;
        }
        if let Some(v) = update.reconnect {
            self.reconnect = v;
        }
        if let Some(v) = update.reconnect_delay {
            self.reconnect_delay = v;
        }
        if let Some(v) = update.backoff_growth {
            self.backoff_growth = v;
        }
        if let Some(v) = update.backoff_initial_delay {
            self.backoff_initial_delay = v;
        }
        if let Some(v) = update.backoff_max_delay {
            self.backoff_max_delay = v;
        }
        if let Some(v) = update.backoff_randomisation_factor {
            self.backoff_randomisation_factor = v;
        }
        if update.backoff_fail_after.is_some() {
            self.backoff_fail_after = update.backoff_fail_after;
        }
        if let Some(v) = update.connection_timeout {
            self.connection_timeout = v;
        }
        if let Some(v) = update.queue_timeout {
            self.queue_timeout = v;
        }
        if let Some(v) = update.send_timeout {
            self.send_timeout = v;
        }
        if let Some(v) = update.retry_interval {
            self.retry_interval = v;
        }
        if let Some(v) = update.tcp_keep_alive {
            self.tcp_keep_alive = v;
        }
        if let Some(v) = update.tcp_keep_alive_initial_delay {
            self.tcp_keep_alive_initial_delay = v;
        }
    }
}

/// A sparse overlay: `None` fields leave the corresponding [`Options`]
/// field unchanged.
#[derive(Debug, Clone, Default)]
pub struct OptionsUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub reconnect: Option<bool>,
    pub reconnect_delay: Option<Duration>,
    pub backoff_growth: Option<Growth>,
    pub backoff_initial_delay: Option<Duration>,
    pub backoff_max_delay: Option<Duration>,
    pub backoff_randomisation_factor: Option<f64>,
    pub backoff_fail_after: Option<u32>,
    pub connection_timeout: Option<Duration>,
    pub queue_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub retry_interval: Option<Duration>,
    pub tcp_keep_alive: Option<bool>,
    pub tcp_keep_alive_initial_delay: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_only_touches_given_fields() {
        let mut opts = Options::new("10.0.0.5", 4998);
        let before_timeout = opts.send_timeout;
        opts.apply(OptionsUpdate {
            reconnect: Some(false),
            ..Default::default()
        });
        assert!(!opts.reconnect);
        assert_eq!(opts.send_timeout, before_timeout);
        assert_eq!(opts.host, "10.0.0.5");
    }

    #[test]
    fn fail_after_can_be_overlaid_to_some() {
        let mut opts = Options::new("10.0.0.5", 4998);
        assert_eq!(opts.backoff_fail_after, None);
        opts.apply(OptionsUpdate {
            backoff_fail_after: Some(5),
            ..Default::default()
        });
        assert_eq!(opts.backoff_fail_after, Some(5));
    }
}
