//! Supervisor configuration

use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "env")]
use crate::error::{ProxyError, Result};

/// Enables rotation when set to `true`.
pub const ENV_ROTATION: &str = "WARP_IP_ROTATION";
/// SOCKS5 listen host.
pub const ENV_HOST: &str = "WARP_SOCKS5_HOST";
/// SOCKS5 listen port.
pub const ENV_PORT: &str = "WARP_SOCKS5_PORT";
/// Path of the config template.
pub const ENV_TEMPLATE: &str = "WIREPROXY_CONFIG_PATH";
/// Daemon executable (name on `PATH` or path).
pub const ENV_BINARY: &str = "WIREPROXY_BINARY";
/// Default secret variable substituted into the template.
pub const DEFAULT_SECRET_VAR: &str = "WARP_PRIVATE_KEY";
/// Argument placeholder replaced by the rendered config path.
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// How an IP-echo endpoint reports the caller's address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum EchoFormat {
    /// JSON object; the address is in `field`
    Json {
        /// Field holding the address
        field: String,
    },
    /// Body is the bare address
    PlainText,
}

/// One IP-echo endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EchoEndpoint {
    /// Full URL
    pub url: String,
    /// Response format
    #[serde(flatten)]
    pub format: EchoFormat,
}

impl EchoEndpoint {
    /// Endpoint answering with a JSON object.
    pub fn json(url: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: EchoFormat::Json {
                field: field.into(),
            },
        }
    }

    /// Endpoint answering with the bare address.
    pub fn plain_text(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: EchoFormat::PlainText,
        }
    }

    /// Endpoints tried in order until one answers.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::json("https://httpbin.org/ip", "origin"),
            Self::json("http://ip-api.com/json/", "query"),
            Self::plain_text("https://api.ipify.org/"),
        ]
    }
}

/// Cadences and deadlines used by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorTimings {
    /// Health-check cadence
    pub health_interval: Duration,
    /// Cadence of self-heal retries after a failed self-heal
    pub slow_retry_interval: Duration,
    /// Delay between startup port polls
    pub startup_poll_interval: Duration,
    /// Absolute startup deadline
    pub startup_timeout: Duration,
    /// TCP connect timeout of the port probe
    pub probe_timeout: Duration,
    /// SOCKS5 greeting timeout
    pub handshake_timeout: Duration,
    /// IP-echo request timeout
    pub egress_timeout: Duration,
    /// SIGTERM to SIGKILL grace period
    pub kill_grace: Duration,
    /// Pause between terminating the old daemon and spawning the new one
    pub restart_pause: Duration,
    /// Wait after a rotation before measuring the new IP
    pub settle_delay: Duration,
    /// Readiness health checks after a respawn
    pub ready_attempts: u32,
    /// Delay between readiness health checks
    pub ready_interval: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            slow_retry_interval: Duration::from_secs(60),
            startup_poll_interval: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            egress_timeout: Duration::from_secs(15),
            kill_grace: Duration::from_secs(5),
            restart_pause: Duration::from_secs(2),
            settle_delay: Duration::from_secs(3),
            ready_attempts: 10,
            ready_interval: Duration::from_secs(2),
        }
    }
}

/// Static supervisor configuration.
///
/// # Examples
///
/// ```rust
/// use egress_proxy::ProxyConfig;
///
/// let config = ProxyConfig::new()
///     .enabled(true)
///     .port(40000)
///     .binary("/usr/local/bin/wireproxy")
///     .with_secret("base64-key=");
///
/// assert_eq!(config.addr(), "127.0.0.1:40000");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Whether rotation is enabled
    pub enabled: bool,
    /// SOCKS5 listen host
    pub host: String,
    /// SOCKS5 listen port
    pub port: u16,
    /// Config template containing the secret placeholder
    pub template_path: PathBuf,
    /// Daemon executable (name on `PATH` or path)
    pub binary: String,
    /// Daemon arguments; `{config}` is replaced by the rendered config path
    pub args: Vec<String>,
    /// Environment variable holding the secret
    pub secret_var: String,
    /// Secret supplied directly instead of through the environment
    #[serde(skip)]
    pub secret: Option<SecretString>,
    /// Lifetime of a cached egress IP
    pub ip_cache_ttl: Duration,
    /// Consecutive failed health checks that trigger a self-heal
    pub failure_threshold: u32,
    /// IP-echo endpoints, tried in order
    pub echo_endpoints: Vec<EchoEndpoint>,
    /// Cadences and deadlines
    #[serde(skip)]
    pub timings: SupervisorTimings,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1080,
            template_path: PathBuf::from("./wireproxy.conf"),
            binary: "wireproxy".to_string(),
            args: vec!["-c".to_string(), CONFIG_PLACEHOLDER.to_string()],
            secret_var: DEFAULT_SECRET_VAR.to_string(),
            secret: None,
            ip_cache_ttl: Duration::from_secs(5 * 60),
            failure_threshold: 3,
            echo_endpoints: EchoEndpoint::defaults(),
            timings: SupervisorTimings::default(),
        }
    }
}

impl ProxyConfig {
    /// Defaults: disabled, `127.0.0.1:1080`, `wireproxy -c {config}`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable rotation.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// SOCKS5 listen host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// SOCKS5 listen port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Config template path.
    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = path.into();
        self
    }

    /// Daemon executable.
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Daemon arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Environment variable holding the secret.
    pub fn secret_var(mut self, var: impl Into<String>) -> Self {
        self.secret_var = var.into();
        self
    }

    /// Supply the secret directly.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::new(secret.into().into_boxed_str()));
        self
    }

    /// Egress IP cache lifetime.
    pub fn ip_cache_ttl(mut self, ttl: Duration) -> Self {
        self.ip_cache_ttl = ttl;
        self
    }

    /// Failed health checks before a self-heal.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// IP-echo endpoints.
    pub fn echo_endpoints(mut self, endpoints: Vec<EchoEndpoint>) -> Self {
        self.echo_endpoints = endpoints;
        self
    }

    /// Cadences and deadlines.
    pub fn timings(mut self, timings: SupervisorTimings) -> Self {
        self.timings = timings;
        self
    }

    /// `host:port` of the SOCKS5 listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL for HTTP clients; `socks5h` resolves names through the proxy.
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.port)
    }

    /// Load configuration from environment variables.
    ///
    /// This will look for:
    /// - `WARP_IP_ROTATION` (`true` enables rotation)
    /// - `WARP_SOCKS5_HOST` and `WARP_SOCKS5_PORT` for the listener
    /// - `WIREPROXY_CONFIG_PATH` for the template
    /// - `WIREPROXY_BINARY` for the daemon executable
    ///
    /// The secret itself is read when the daemon starts, not here.
    #[cfg(feature = "env")]
    pub fn from_env() -> Result<Self> {
        use std::env;

        let mut config = Self::default();

        if let Ok(flag) = env::var(ENV_ROTATION) {
            config.enabled = flag.trim().eq_ignore_ascii_case("true");
        }

        if let Ok(host) = env::var(ENV_HOST)
            && !host.trim().is_empty()
        {
            config.host = host.trim().to_string();
        }

        if let Ok(port) = env::var(ENV_PORT) {
            config.port = port
                .trim()
                .parse()
                .map_err(|e| ProxyError::config(ENV_PORT, format!("{}: '{}'", e, port)))?;
        }

        if let Ok(path) = env::var(ENV_TEMPLATE)
            && !path.trim().is_empty()
        {
            config.template_path = PathBuf::from(path.trim());
        }

        if let Ok(binary) = env::var(ENV_BINARY)
            && !binary.trim().is_empty()
        {
            config.binary = binary.trim().to_string();
        }

        Ok(config)
    }

    /// Load a `.env` file (if present), then [`from_env`](Self::from_env).
    #[cfg(feature = "env")]
    pub fn from_dotenv() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.addr(), "127.0.0.1:1080");
        assert_eq!(config.proxy_url(), "socks5h://127.0.0.1:1080");
        assert_eq!(config.template_path, PathBuf::from("./wireproxy.conf"));
        assert_eq!(config.binary, "wireproxy");
        assert_eq!(config.args, vec!["-c", "{config}"]);
        assert_eq!(config.ip_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.echo_endpoints.len(), 3);
        assert_eq!(config.timings.health_interval, Duration::from_secs(30));
        assert_eq!(config.timings.startup_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = ProxyConfig::new()
            .enabled(true)
            .host("0.0.0.0")
            .port(9050)
            .args(["--config", "{config}", "--silent"])
            .with_secret("k3y")
            .failure_threshold(0);

        assert!(config.enabled);
        assert_eq!(config.addr(), "0.0.0.0:9050");
        assert_eq!(config.args.len(), 3);
        assert_eq!(config.secret.as_ref().unwrap().expose_secret(), "k3y");
        assert_eq!(config.failure_threshold, 1);
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = ProxyConfig::new().with_secret("super-secret-key");
        assert!(!format!("{:?}", config).contains("super-secret-key"));
    }

    #[test]
    fn test_deserialize_endpoints() {
        let config: ProxyConfig = serde_json::from_str(
            r#"{
                "enabled": true,
                "port": 40000,
                "echo_endpoints": [
                    {"url": "http://localhost/ip", "format": "json", "field": "ip"},
                    {"url": "http://localhost/raw", "format": "plain_text"}
                ]
            }"#,
        )
        .unwrap();

        assert!(config.enabled);
        assert_eq!(config.port, 40000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(
            config.echo_endpoints,
            vec![
                EchoEndpoint::json("http://localhost/ip", "ip"),
                EchoEndpoint::plain_text("http://localhost/raw"),
            ]
        );
    }

    #[cfg(feature = "env")]
    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                (ENV_ROTATION, Some("true")),
                (ENV_HOST, Some("10.0.0.2")),
                (ENV_PORT, Some("40000")),
                (ENV_TEMPLATE, Some("/etc/wireproxy/template.conf")),
                (ENV_BINARY, Some("/opt/wireproxy")),
            ],
            || {
                let config = ProxyConfig::from_env().unwrap();
                assert!(config.enabled);
                assert_eq!(config.addr(), "10.0.0.2:40000");
                assert_eq!(
                    config.template_path,
                    PathBuf::from("/etc/wireproxy/template.conf")
                );
                assert_eq!(config.binary, "/opt/wireproxy");
            },
        );
    }

    #[cfg(feature = "env")]
    #[test]
    fn test_from_env_rotation_flag_is_strict() {
        temp_env::with_vars(
            [
                (ENV_ROTATION, Some("yes")),
                (ENV_HOST, None),
                (ENV_PORT, None),
                (ENV_TEMPLATE, None),
                (ENV_BINARY, None),
            ],
            || {
                let config = ProxyConfig::from_env().unwrap();
                assert!(!config.enabled);
                assert_eq!(config.port, 1080);
            },
        );
    }

    #[cfg(feature = "env")]
    #[test]
    fn test_from_env_bad_port() {
        temp_env::with_vars(
            [
                (ENV_ROTATION, None),
                (ENV_HOST, None),
                (ENV_PORT, Some("socks")),
                (ENV_TEMPLATE, None),
                (ENV_BINARY, None),
            ],
            || {
                let err = ProxyConfig::from_env().unwrap_err();
                assert!(matches!(err, ProxyError::Config { .. }));
            },
        );
    }
}
