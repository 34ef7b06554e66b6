use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use crate::engine::{EngineConfig, ForwardRule};
use crate::relay::DEFAULT_BUFFER_SIZE;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub forwarders: Vec<ForwarderConfig>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_tcp_no_delay")]
    pub tcp_no_delay: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Seconds between connect attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    pub thread_pool: ThreadPoolConfig,
    pub logging: LoggingConfig,
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    pub listen_address: String,
    pub listen_port: Option<u16>,
    pub target_address: String,
    pub target_port: Option<u16>,
    pub port_range: Option<PortRange>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Deserialize)]
pub struct ThreadPoolConfig {
    pub threads: usize,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub file: String,
    /// TRACE, DEBUG, INFO, WARN or ERROR. Anything else logs everything.
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Seconds between heartbeats.
    pub interval: u64,
}

const fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

const fn default_tcp_no_delay() -> bool {
    true
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_delay() -> u64 {
    2
}

const fn default_max_connections() -> usize {
    100
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Parses and validates a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config as valid TOML")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.forwarders.is_empty() {
            bail!("'forwarders' must list at least one forwarder");
        }
        if self.thread_pool.threads == 0 {
            bail!("'thread_pool.threads' must be at least 1");
        }
        if self.buffer_size == 0 {
            bail!("'buffer_size' must be greater than 0");
        }
        if self.max_connections == 0 {
            bail!("'max_connections' must be greater than 0");
        }
        if self.health_check.enabled && self.health_check.interval == 0 {
            bail!("'health_check.interval' must be at least 1 second");
        }

        for (index, forwarder) in self.forwarders.iter().enumerate() {
            forwarder
                .rules()
                .with_context(|| format!("Invalid forwarder #{}", index + 1))?;
        }
        Ok(())
    }

    /// Every forwarder expanded into concrete rules, in document order.
    pub fn rules(&self) -> Result<Vec<ForwardRule>> {
        let mut rules = Vec::new();
        for forwarder in &self.forwarders {
            rules.extend(forwarder.rules()?);
        }
        Ok(rules)
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_size: self.buffer_size,
            tcp_no_delay: self.tcp_no_delay,
            retry: RetryPolicy::new(self.retry_attempts, Duration::from_secs(self.retry_delay)),
            max_connections: self.max_connections,
        }
    }
}

impl ForwarderConfig {
    /// A port range pairs listen port `p` with target port `p` for every `p`
    /// in `start..=end` and takes precedence over the single ports.
    pub fn rules(&self) -> Result<Vec<ForwardRule>> {
        let listen_ip = parse_ip(&self.listen_address, "listen_address")?;
        let target_ip = parse_ip(&self.target_address, "target_address")?;

        if let Some(range) = self.port_range {
            if range.start > range.end {
                bail!(
                    "port_range start {} is greater than end {}",
                    range.start,
                    range.end
                );
            }
            return Ok((range.start..=range.end)
                .map(|port| ForwardRule {
                    listen: SocketAddr::new(listen_ip, port),
                    target: SocketAddr::new(target_ip, port),
                })
                .collect());
        }

        let listen_port = self
            .listen_port
            .ok_or_else(|| anyhow!("'listen_port' is required unless 'port_range' is given"))?;
        let target_port = self
            .target_port
            .ok_or_else(|| anyhow!("'target_port' is required unless 'port_range' is given"))?;

        Ok(vec![ForwardRule {
            listen: SocketAddr::new(listen_ip, listen_port),
            target: SocketAddr::new(target_ip, target_port),
        }])
    }
}

fn parse_ip(value: &str, key: &str) -> Result<IpAddr> {
    value
        .parse()
        .with_context(|| format!("'{key}' is not an IPv4 or IPv6 address: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
buffer_size = 4096
tcp_no_delay = false
retry_attempts = 5
retry_delay = 1
max_connections = 10

[[forwarders]]
listen_address = "::"
listen_port = 8080
target_address = "2001:db8::1"
target_port = 9090

[thread_pool]
threads = 4

[logging]
enabled = true
file = "forwarder.log"
level = "DEBUG"

[health_check]
enabled = true
interval = 10
"#;

    const MINIMAL: &str = r#"
[[forwarders]]
listen_address = "127.0.0.1"
listen_port = 8080
target_address = "10.0.0.1"
target_port = 80

[thread_pool]
threads = 1

[logging]
enabled = false
file = "forwarder.log"

[health_check]
enabled = false
interval = 0
"#;

    fn without_section(doc: &str, section: &str) -> String {
        let mut out = Vec::new();
        let mut skipping = false;
        for line in doc.lines() {
            if line.starts_with('[') {
                skipping = line == section;
            }
            if !skipping {
                out.push(line);
            }
        }
        out.join("\n")
    }

    mod parsing {
        use super::*;

        #[test]
        fn reads_every_key() {
            let config = parse_config(FULL).unwrap();
            assert_eq!(config.buffer_size, 4096);
            assert!(!config.tcp_no_delay);
            assert_eq!(config.retry_attempts, 5);
            assert_eq!(config.retry_delay, 1);
            assert_eq!(config.max_connections, 10);
            assert_eq!(config.thread_pool.threads, 4);
            assert!(config.logging.enabled);
            assert_eq!(config.logging.file, "forwarder.log");
            assert_eq!(config.logging.level.as_deref(), Some("DEBUG"));
            assert!(config.health_check.enabled);
            assert_eq!(config.health_check.interval, 10);
        }

        #[test]
        fn applies_defaults() {
            let config = parse_config(MINIMAL).unwrap();
            assert_eq!(config.buffer_size, 8192);
            assert!(config.tcp_no_delay);
            assert_eq!(config.retry_attempts, 3);
            assert_eq!(config.retry_delay, 2);
            assert_eq!(config.max_connections, 100);
            assert_eq!(config.logging.level, None);
        }

        #[test]
        fn engine_config_carries_settings() {
            let engine = parse_config(FULL).unwrap().engine_config();
            assert_eq!(engine.buffer_size, 4096);
            assert!(!engine.tcp_no_delay);
            assert_eq!(engine.retry, RetryPolicy::new(5, Duration::from_secs(1)));
            assert_eq!(engine.max_connections, 10);
        }

        #[test]
        fn loads_from_file() {
            let path = std::env::temp_dir().join(format!(
                "tcp-forwarder-config-{}.toml",
                std::process::id()
            ));
            fs::write(&path, FULL).unwrap();
            let config = load_config(&path);
            fs::remove_file(&path).unwrap();
            assert_eq!(config.unwrap().thread_pool.threads, 4);
        }

        #[test]
        fn missing_file_names_path() {
            let err = load_config("/nonexistent/forwarder.toml").unwrap_err();
            assert!(format!("{err:#}").contains("/nonexistent/forwarder.toml"));
        }
    }

    mod fatal_keys {
        use super::*;

        #[test]
        fn missing_forwarders() {
            let doc = MINIMAL.replace("[[forwarders]]", "[unused]");
            let err = parse_config(&doc).unwrap_err();
            assert!(format!("{err:#}").contains("forwarders"));
        }

        #[test]
        fn empty_forwarders() {
            let doc = format!("forwarders = []\n{}", without_section(MINIMAL, "[[forwarders]]"));
            assert!(parse_config(&doc).is_err());
        }

        #[test]
        fn missing_thread_pool() {
            let doc = without_section(MINIMAL, "[thread_pool]");
            let err = parse_config(&doc).unwrap_err();
            assert!(format!("{err:#}").contains("thread_pool"));
        }

        #[test]
        fn zero_threads() {
            let doc = MINIMAL.replace("threads = 1", "threads = 0");
            assert!(parse_config(&doc).is_err());
        }

        #[test]
        fn incomplete_logging() {
            let doc = MINIMAL.replace("file = \"forwarder.log\"", "");
            let err = parse_config(&doc).unwrap_err();
            assert!(format!("{err:#}").contains("file"));
        }

        #[test]
        fn incomplete_health_check() {
            let doc = MINIMAL.replace("interval = 0", "");
            let err = parse_config(&doc).unwrap_err();
            assert!(format!("{err:#}").contains("interval"));
        }

        #[test]
        fn zero_interval_when_enabled() {
            let doc = MINIMAL.replace("enabled = false\ninterval = 0", "enabled = true\ninterval = 0");
            assert!(parse_config(&doc).is_err());
        }

        #[test]
        fn zero_buffer_size() {
            let doc = format!("buffer_size = 0\n{MINIMAL}");
            assert!(parse_config(&doc).is_err());
        }

        #[test]
        fn bad_listen_address() {
            let doc = MINIMAL.replace("\"127.0.0.1\"", "\"localhost\"");
            let err = parse_config(&doc).unwrap_err();
            assert!(format!("{err:#}").contains("listen_address"));
        }

        #[test]
        fn missing_ports_without_range() {
            let doc = MINIMAL.replace("target_port = 80", "");
            let err = parse_config(&doc).unwrap_err();
            assert!(format!("{err:#}").contains("target_port"));
        }
    }

    mod rule_expansion {
        use super::*;

        fn forwarder(range: Option<PortRange>) -> ForwarderConfig {
            ForwarderConfig {
                listen_address: "0.0.0.0".to_string(),
                listen_port: Some(1000),
                target_address: "192.0.2.7".to_string(),
                target_port: Some(2000),
                port_range: range,
            }
        }

        #[test]
        fn single_ports() {
            let rules = forwarder(None).rules().unwrap();
            assert_eq!(
                rules,
                vec![ForwardRule {
                    listen: "0.0.0.0:1000".parse().unwrap(),
                    target: "192.0.2.7:2000".parse().unwrap(),
                }]
            );
        }

        #[test]
        fn port_range_pairs_same_numbered_ports() {
            let rules = forwarder(Some(PortRange {
                start: 9000,
                end: 9002,
            }))
            .rules()
            .unwrap();

            assert_eq!(rules.len(), 3);
            for (rule, port) in rules.iter().zip(9000..=9002) {
                assert_eq!(rule.listen, SocketAddr::new("0.0.0.0".parse().unwrap(), port));
                assert_eq!(rule.target, SocketAddr::new("192.0.2.7".parse().unwrap(), port));
            }
        }

        #[test]
        fn single_port_range() {
            let rules = forwarder(Some(PortRange { start: 7, end: 7 })).rules().unwrap();
            assert_eq!(rules.len(), 1);
            assert_eq!(rules[0].listen.port(), 7);
        }

        #[test]
        fn inverted_range_is_rejected() {
            let result = forwarder(Some(PortRange {
                start: 9002,
                end: 9000,
            }))
            .rules();
            assert!(result.is_err());
        }

        #[test]
        fn range_without_single_ports() {
            let doc = r#"
[[forwarders]]
listen_address = "::1"
target_address = "::1"
port_range = { start = 9000, end = 9002 }

[[forwarders]]
listen_address = "127.0.0.1"
listen_port = 7000
target_address = "127.0.0.1"
target_port = 7001

[thread_pool]
threads = 2

[logging]
enabled = false
file = "x.log"

[health_check]
enabled = false
interval = 5
"#;
            let rules = parse_config(doc).unwrap().rules().unwrap();
            let listen_ports: Vec<_> = rules.iter().map(|r| r.listen.port()).collect();
            assert_eq!(listen_ports, vec![9000, 9001, 9002, 7000]);
            assert!(rules[..3].iter().all(|r| r.target.ip().is_loopback()));
            assert_eq!(rules[3].target.port(), 7001);
        }
    }
}
