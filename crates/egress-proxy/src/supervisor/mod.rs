//! Proxy daemon supervisor
//!
//! [`ProxySupervisor`] owns one local SOCKS5 daemon. It renders the daemon's
//! config with the secret substituted in, spawns it in its own process group,
//! waits for the port, and then supervises it:
//!
//! - a periodic three-stage health check (port, SOCKS5 greeting, egress IP)
//! - self-healing restarts after repeated failures
//! - an egress IP cache with a bounded lifetime
//! - [`rotate_ip`](ProxySupervisor::rotate_ip), which restarts the daemon to
//!   obtain a new egress address
//!
//! Health checking and rotation share one critical section, so a rotation
//! never races a self-heal.
//!
//! # Examples
//!
//! ```rust,no_run
//! use egress_proxy::{ProxyConfig, ProxySupervisor};
//!
//! # async fn example() -> egress_proxy::Result<()> {
//! let supervisor = ProxySupervisor::new(ProxyConfig::from_env()?)?;
//! supervisor.start(None).await?;
//!
//! if let Some(rotation) = supervisor.rotate_ip(Some("acct-7")).await? {
//!     println!("{:?} -> {}", rotation.old_ip, rotation.new_ip);
//! }
//!
//! supervisor.cleanup().await;
//! # Ok(())
//! # }
//! ```

mod health;
mod state;

pub use state::{RotationResult, SupervisorPhase, SupervisorStatus};

use crate::config::{CONFIG_PLACEHOLDER, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::http::{EchoClient, IpCache};
use crate::probe;
use crate::subprocess::{DaemonProcess, RenderedConfig, binary, template};
use crate::traits::EgressIpSource;
use chrono::Utc;
use egress_core::ResilienceContext;
use egress_core::classify::ErrorClassifier;
use egress_core::monitor::{LogLevel, MonitorConfig, MonitorLogger, categories};
use health::HealthLoop;
use state::ProcessState;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Metric keys recorded by the supervisor.
pub mod metrics {
    /// Category all supervisor counters live under
    pub const CATEGORY: &str = "proxy";
    /// Passing health checks
    pub const HEALTH_PASSED: &str = "health_check_passed";
    /// Failing health checks
    pub const HEALTH_FAILED: &str = "health_check_failed";
    /// Daemon starts that failed
    pub const START_FAILURES: &str = "start_failures";
    /// Successful self-heal restarts
    pub const RESTARTS: &str = "restarts";
    /// Failed self-heal restarts
    pub const RESTART_FAILURES: &str = "restart_failures";
    /// Completed rotations
    pub const ROTATIONS: &str = "rotations";
    /// Failed rotations
    pub const ROTATION_FAILURES: &str = "rotation_failures";
    /// Egress IP lookups that hit the network
    pub const IP_LOOKUPS: &str = "ip_lookups";
    /// Egress IP lookups that failed
    pub const IP_LOOKUP_FAILURES: &str = "ip_lookup_failures";
    /// Egress IP lookups served from the cache
    pub const IP_CACHE_HITS: &str = "ip_cache_hits";
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervisor for one local proxy daemon.
///
/// Cheap to clone; clones share the daemon.
#[derive(Clone)]
pub struct ProxySupervisor {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: ProxyConfig,
    source: Arc<dyn EgressIpSource>,
    monitor: Arc<MonitorLogger>,
    classifier: Arc<ErrorClassifier>,
    state: tokio::sync::Mutex<ProcessState>,
    /// Held by rotation, self-heal, start and teardown
    critical: tokio::sync::Mutex<()>,
    cache: Mutex<IpCache>,
    health: Mutex<Option<HealthLoop>>,
}

/// Builder for [`ProxySupervisor`].
pub struct ProxySupervisorBuilder {
    config: ProxyConfig,
    source: Option<Arc<dyn EgressIpSource>>,
    monitor: Option<Arc<MonitorLogger>>,
    classifier: Option<Arc<ErrorClassifier>>,
}

impl ProxySupervisorBuilder {
    /// Use `source` for egress IP lookups instead of the IP-echo client.
    pub fn source(mut self, source: Arc<dyn EgressIpSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Report through a shared monitor.
    pub fn monitor(mut self, monitor: Arc<MonitorLogger>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Share the monitor and error classifier of a resilience context.
    pub fn context(mut self, context: &ResilienceContext) -> Self {
        self.monitor = Some(context.monitor().clone());
        self.classifier = Some(context.classifier().clone());
        self
    }

    /// Build the supervisor. Nothing is spawned until [`ProxySupervisor::start`].
    pub fn build(self) -> Result<ProxySupervisor> {
        let source = match self.source {
            Some(source) => source,
            None => Arc::new(EchoClient::for_proxy(&self.config)?),
        };
        let monitor = self.monitor.unwrap_or_else(|| {
            Arc::new(MonitorLogger::new(MonitorConfig {
                component: "WARP".to_string(),
                ..MonitorConfig::default()
            }))
        });
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(ErrorClassifier::new()));
        let cache = IpCache::new(self.config.ip_cache_ttl);

        Ok(ProxySupervisor {
            inner: Arc::new(Inner {
                config: self.config,
                source,
                monitor,
                classifier,
                state: tokio::sync::Mutex::new(ProcessState::default()),
                critical: tokio::sync::Mutex::new(()),
                cache: Mutex::new(cache),
                health: Mutex::new(None),
            }),
        })
    }
}

impl ProxySupervisor {
    /// Supervisor that looks up its egress IP through the proxy itself.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a supervisor.
    pub fn builder(config: ProxyConfig) -> ProxySupervisorBuilder {
        ProxySupervisorBuilder {
            config,
            source: None,
            monitor: None,
            classifier: None,
        }
    }

    /// Whether rotation is enabled by configuration
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Static configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Monitor the supervisor reports through
    pub fn monitor(&self) -> &Arc<MonitorLogger> {
        &self.inner.monitor
    }

    /// Spawn the daemon, wait until it listens, and begin health checking.
    ///
    /// On failure nothing is left behind: the temp config is deleted and a
    /// spawned child is killed.
    pub async fn start(&self, subject_id: Option<&str>) -> Result<()> {
        if !self.is_enabled() {
            return Err(ProxyError::Disabled);
        }

        let _critical = self.inner.critical.lock().await;
        if self.inner.state.lock().await.process.is_some() {
            return Err(ProxyError::AlreadyRunning);
        }

        self.inner.spawn_daemon(subject_id).await?;
        self.start_health_loop(subject_id);
        Ok(())
    }

    /// Run the three-stage check once: port, SOCKS5 greeting, egress IP.
    ///
    /// Stops at the first failing stage. Does not touch the failure counter.
    pub async fn perform_health_check(&self, subject_id: Option<&str>) -> bool {
        self.inner.perform_health_check(subject_id).await
    }

    /// Current egress IP, served from the cache while it is fresh.
    pub async fn get_current_egress_ip(&self, subject_id: Option<&str>) -> Result<IpAddr> {
        self.inner.get_current_egress_ip(subject_id).await
    }

    /// Forget the cached egress IP.
    pub fn clear_ip_cache(&self) {
        lock(&self.inner.cache).clear();
        self.inner.log("IP cache cleared", LogLevel::Debug, None);
    }

    /// Restart the daemon to obtain a new egress IP.
    ///
    /// Returns `Ok(None)` without doing anything when rotation is disabled.
    /// Health checking is suspended for the duration and resumed before
    /// returning, whether the rotation succeeded or not.
    pub async fn rotate_ip(&self, subject_id: Option<&str>) -> Result<Option<RotationResult>> {
        if !self.is_enabled() {
            self.inner
                .log("IP rotation is disabled, skipping", LogLevel::Info, subject_id);
            return Ok(None);
        }

        let _critical = self.inner.critical.lock().await;
        let started = Instant::now();
        self.inner.log("Starting IP rotation", LogLevel::Info, subject_id);

        lock(&self.inner.cache).clear();
        let old_ip = match self.inner.get_current_egress_ip(subject_id).await {
            Ok(ip) => Some(ip),
            Err(err) => {
                self.inner.log(
                    &format!("Could not measure IP before rotation: {}", err),
                    LogLevel::Warn,
                    subject_id,
                );
                None
            }
        };

        self.stop_health_loop().await;
        let rotated = self.inner.rotate(subject_id).await;
        self.start_health_loop(subject_id);

        let duration = started.elapsed();
        match rotated {
            Ok(new_ip) => {
                let changed = old_ip != Some(new_ip);
                let message = match old_ip {
                    Some(old) if changed => format!(
                        "IP rotated: {} -> {} ({}ms)",
                        old,
                        new_ip,
                        duration.as_millis()
                    ),
                    Some(_) => format!(
                        "Rotation finished but IP unchanged: {} ({}ms)",
                        new_ip,
                        duration.as_millis()
                    ),
                    None => format!("IP rotated to {} ({}ms)", new_ip, duration.as_millis()),
                };
                self.inner.log(&message, LogLevel::Info, subject_id);
                self.inner.count(metrics::ROTATIONS);

                Ok(Some(RotationResult {
                    old_ip,
                    new_ip,
                    changed,
                    duration,
                    timestamp: Utc::now(),
                }))
            }
            Err(err) => {
                self.inner.log(
                    &format!("IP rotation failed after {}ms: {}", duration.as_millis(), err),
                    LogLevel::Error,
                    subject_id,
                );
                self.inner.count(metrics::ROTATION_FAILURES);
                Err(err)
            }
        }
    }

    /// Stop supervision and release everything. Safe to call repeatedly.
    pub async fn cleanup(&self) {
        let _critical = self.inner.critical.lock().await;
        self.stop_health_loop().await;
        lock(&self.inner.cache).clear();

        let (process, config_file) = self.inner.state.lock().await.take_daemon();
        if let Some(process) = process {
            let pid = process.pid();
            if let Err(err) = process.terminate(self.inner.config.timings.kill_grace).await {
                self.inner.log(
                    &format!("Failed to terminate proxy daemon (PID {}): {}", pid, err),
                    LogLevel::Warn,
                    None,
                );
            }
        }
        if let Some(config_file) = config_file {
            remove_config(config_file, &self.inner);
        }
        self.inner.log("Proxy supervisor cleaned up", LogLevel::Info, None);
    }

    /// Stop supervision and SIGKILL the daemon without a grace period.
    pub async fn force_kill(&self, subject_id: Option<&str>) -> Result<()> {
        let _critical = self.inner.critical.lock().await;
        self.stop_health_loop().await;

        let (process, config_file) = self.inner.state.lock().await.take_daemon();
        if let Some(config_file) = config_file {
            remove_config(config_file, &self.inner);
        }
        match process {
            Some(process) => {
                let pid = process.pid();
                self.inner.log(
                    &format!("Force killing proxy daemon (PID {})", pid),
                    LogLevel::Warn,
                    subject_id,
                );
                process.force_kill().await
            }
            None => Ok(()),
        }
    }

    /// Snapshot of the supervisor's state.
    pub async fn status(&self) -> SupervisorStatus {
        let config = &self.inner.config;
        let state = self.inner.state.lock().await;
        let pid = state.process.as_ref().map(DaemonProcess::pid);

        SupervisorStatus {
            enabled: config.enabled,
            phase: state.phase,
            running: pid.is_some(),
            pid,
            last_health_check_at: state.last_health_check_at,
            consecutive_failures: state.consecutive_failures,
            health_check_running: self.is_health_check_running(),
            host: config.host.clone(),
            port: config.port,
            template_path: config.template_path.clone(),
            binary: config.binary.clone(),
            rendered_config: state
                .config_file
                .as_ref()
                .map(|file| file.path().to_path_buf()),
            uptime: state.started_at.map(|at| at.elapsed()),
            cached_ip: lock(&self.inner.cache).get(),
        }
    }

    /// Whether the periodic health check is scheduled
    pub fn is_health_check_running(&self) -> bool {
        lock(&self.inner.health)
            .as_ref()
            .is_some_and(|health| !health.is_finished())
    }

    fn start_health_loop(&self, subject_id: Option<&str>) {
        let next = HealthLoop::spawn(&self.inner, subject_id.map(str::to_string));
        // A loop left over from an earlier start is replaced, never duplicated.
        if let Some(previous) = lock(&self.inner.health).replace(next) {
            previous.cancel();
        }
        self.inner
            .log("Health check started", LogLevel::Debug, subject_id);
    }

    async fn stop_health_loop(&self) {
        let current = lock(&self.inner.health).take();
        if let Some(health) = current {
            health.stop().await;
            self.inner.log("Health check stopped", LogLevel::Debug, None);
        }
    }
}

impl std::fmt::Debug for ProxySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySupervisor")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(health) = lock(&self.health).take() {
            health.cancel();
        }
    }
}

fn remove_config(config_file: RenderedConfig, inner: &Inner) {
    let path = config_file.path().display().to_string();
    match config_file.remove() {
        Ok(()) => inner.log(&format!("Removed temp config {}", path), LogLevel::Debug, None),
        Err(err) => inner.log(
            &format!("Failed to remove temp config {}: {}", path, err),
            LogLevel::Warn,
            None,
        ),
    }
}

impl Inner {
    fn log(&self, message: &str, level: LogLevel, subject_id: Option<&str>) {
        self.monitor.log(message, level, subject_id);
    }

    fn count(&self, key: &str) {
        self.monitor.record_metric(metrics::CATEGORY, key, 1);
    }

    async fn get_current_egress_ip(&self, subject_id: Option<&str>) -> Result<IpAddr> {
        if let Some(ip) = lock(&self.cache).get() {
            self.count(metrics::IP_CACHE_HITS);
            self.log(&format!("Using cached IP {}", ip), LogLevel::Debug, subject_id);
            return Ok(ip);
        }

        let started = Instant::now();
        self.count(metrics::IP_LOOKUPS);
        match self.source.fetch_ip(subject_id).await {
            Ok(ip) => {
                lock(&self.cache).put(ip);
                self.log(
                    &format!("Egress IP {} ({}ms)", ip, started.elapsed().as_millis()),
                    LogLevel::Info,
                    subject_id,
                );
                Ok(ip)
            }
            Err(err) => {
                let class = self.classifier.classify(&err);
                self.count(metrics::IP_LOOKUP_FAILURES);
                self.monitor
                    .record_metric(categories::ERRORS, class.as_str(), 1);
                self.log(
                    &format!(
                        "Egress IP lookup failed after {}ms [{}]: {}",
                        started.elapsed().as_millis(),
                        class,
                        err
                    ),
                    LogLevel::Warn,
                    subject_id,
                );
                Err(err)
            }
        }
    }

    async fn perform_health_check(&self, subject_id: Option<&str>) -> bool {
        let timings = &self.config.timings;
        let addr = self.config.addr();

        if !probe::port_open(&addr, timings.probe_timeout).await {
            self.log(
                &format!("Health check failed: {} is not listening", addr),
                LogLevel::Warn,
                subject_id,
            );
            return false;
        }

        if !probe::socks5_handshake(&addr, timings.handshake_timeout).await {
            self.log(
                "Health check failed: SOCKS5 handshake rejected",
                LogLevel::Warn,
                subject_id,
            );
            return false;
        }

        match self.get_current_egress_ip(subject_id).await {
            Ok(_) => true,
            Err(err) => {
                self.log(
                    &format!("Health check failed: no egress connectivity ({})", err),
                    LogLevel::Warn,
                    subject_id,
                );
                false
            }
        }
    }

    /// Render, spawn and wait for the port. The caller holds `critical`.
    async fn spawn_daemon(&self, subject_id: Option<&str>) -> Result<()> {
        let result = self.try_spawn_daemon(subject_id).await;
        if let Err(err) = &result {
            self.count(metrics::START_FAILURES);
            self.log(
                &format!("Failed to start proxy daemon: {}", err),
                LogLevel::Error,
                subject_id,
            );
        }
        result
    }

    async fn try_spawn_daemon(&self, subject_id: Option<&str>) -> Result<()> {
        let config = &self.config;
        let binary = binary::resolve(&config.binary)?;
        if !config.template_path.is_file() {
            return Err(ProxyError::TemplateMissing(config.template_path.clone()));
        }
        let secret = match &config.secret {
            Some(secret) => secret.clone(),
            None => template::secret_from_env(&config.secret_var)?,
        };

        let rendered = RenderedConfig::write(&config.template_path, &config.secret_var, &secret)?;
        let config_path = rendered.path().display().to_string();
        let args: Vec<String> = config
            .args
            .iter()
            .map(|arg| arg.replace(CONFIG_PLACEHOLDER, &config_path))
            .collect();

        self.log(
            &format!("Starting {} {}", binary.display(), args.join(" ")),
            LogLevel::Info,
            subject_id,
        );
        self.state.lock().await.phase = SupervisorPhase::Starting;

        let mut process = match DaemonProcess::spawn(&binary, &args, &config.secret_var) {
            Ok(process) => process,
            Err(err) => {
                self.state.lock().await.phase = SupervisorPhase::Stopped;
                return Err(err);
            }
        };

        if let Err(err) = self.wait_listening(&mut process).await {
            let _ = process.force_kill().await;
            self.state.lock().await.phase = SupervisorPhase::Stopped;
            return Err(err);
        }

        lock(&self.cache).clear();
        let pid = process.pid();
        self.state.lock().await.install(process, rendered);
        self.log(
            &format!("Proxy daemon (PID {}) listening on {}", pid, config.addr()),
            LogLevel::Info,
            subject_id,
        );
        Ok(())
    }

    /// Poll the port until it accepts, the child exits, or the deadline passes.
    async fn wait_listening(&self, process: &mut DaemonProcess) -> Result<()> {
        let timings = &self.config.timings;
        let addr = self.config.addr();
        let deadline = Instant::now() + timings.startup_timeout;

        let poll = async {
            loop {
                if let Some(status) = process.exit_status() {
                    return Err(ProxyError::ProcessExited {
                        status: status.to_string(),
                    });
                }
                if probe::port_open(&addr, timings.probe_timeout).await {
                    return Ok(());
                }
                tokio::time::sleep(timings.startup_poll_interval).await;
            }
        };

        match tokio::time::timeout_at(deadline, poll).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::StartupTimeout {
                addr: self.config.addr(),
                timeout: timings.startup_timeout,
            }),
        }
    }

    /// Terminate the current daemon (if any), then spawn and ready a new one.
    async fn restart(&self, subject_id: Option<&str>) -> Result<()> {
        let (process, config_file) = {
            let mut state = self.state.lock().await;
            let daemon = state.take_daemon();
            state.phase = SupervisorPhase::Restarting;
            daemon
        };

        if let Some(process) = process {
            process.terminate(self.config.timings.kill_grace).await?;
        }
        if let Some(config_file) = config_file {
            remove_config(config_file, self);
        }

        tokio::time::sleep(self.config.timings.restart_pause).await;
        self.spawn_daemon(subject_id).await?;

        if let Err(err) = self.wait_ready(subject_id).await {
            let mut state = self.state.lock().await;
            if state.process.is_some() {
                state.phase = SupervisorPhase::Degraded;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Re-run the health check until it passes or attempts run out.
    async fn wait_ready(&self, subject_id: Option<&str>) -> Result<()> {
        let timings = &self.config.timings;
        for attempt in 1..=timings.ready_attempts {
            if self.perform_health_check(subject_id).await {
                self.mark_healthy().await;
                return Ok(());
            }
            self.log(
                &format!("Waiting for proxy, attempt {}/{}", attempt, timings.ready_attempts),
                LogLevel::Debug,
                subject_id,
            );
            tokio::time::sleep(timings.ready_interval).await;
        }
        Err(ProxyError::NotReady {
            attempts: timings.ready_attempts,
        })
    }

    async fn rotate(&self, subject_id: Option<&str>) -> Result<IpAddr> {
        self.restart(subject_id).await?;
        tokio::time::sleep(self.config.timings.settle_delay).await;
        // The cache was emptied at respawn, so this reflects the new daemon.
        self.get_current_egress_ip(subject_id).await
    }

    async fn mark_healthy(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        state.last_health_check_at = Some(Utc::now());
        if state.process.is_some() {
            state.phase = SupervisorPhase::Healthy;
        }
    }
}
