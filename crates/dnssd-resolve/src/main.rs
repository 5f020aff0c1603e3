// # dnssd-resolve - DNS-SD Service Resolver
//
// Thin command-line front end for dnssd-core. All resolution logic lives in
// the core library; this binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Registers backends and builds the configured one
// 4. Resolves once, or monitors until SIGINT/SIGTERM
//
// ## Configuration
//
// ### Service
// - `DNSSD_SERVICE_NAME`: Instance name (required), e.g. `printer`
// - `DNSSD_SERVICE_TYPE`: Service type (required), e.g. `_ipp._tcp`
// - `DNSSD_SERVICE_DOMAIN`: Domain (default `local`)
//
// ### Behavior
// - `DNSSD_MODE`: `once` (default) or `monitor`
// - `DNSSD_RESOLVE_TIMEOUT_MS`: Give up a `once` resolve after this long
//   (default 5000)
// - `DNSSD_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ## Example
//
// ```bash
// export DNSSD_SERVICE_NAME=printer
// export DNSSD_SERVICE_TYPE=_ipp._tcp
// export DNSSD_MODE=monitor
//
// dnssd-resolve
// ```
//
// Each resolution is printed to stdout as `host port`, or `unresolved`.

use anyhow::Result;
use dnssd_core::{
    BackendConfig, BackendRegistry, ResolvedEvent, Resolver, ResolverConfig, ServiceReference,
};
use std::env;
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Default bound on a one-shot resolve from the command line
const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5000;

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveExitCode {
    /// Resolved (once) or clean shutdown (monitor)
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// The service did not resolve
    NotResolved = 3,
}

impl From<ResolveExitCode> for ExitCode {
    fn from(code: ResolveExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Once,
    Monitor,
}

/// Application configuration
#[derive(Debug)]
struct Config {
    service_name: String,
    service_type: String,
    service_domain: String,
    mode: String,
    resolve_timeout_ms: Option<u64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let resolve_timeout_ms = match var("DNSSD_RESOLVE_TIMEOUT_MS") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| {
                anyhow::anyhow!(
                    "DNSSD_RESOLVE_TIMEOUT_MS must be a number of milliseconds. Got: {}",
                    raw
                )
            })?),
            None => None,
        };

        Ok(Self {
            service_name: var("DNSSD_SERVICE_NAME").unwrap_or_default(),
            service_type: var("DNSSD_SERVICE_TYPE").unwrap_or_default(),
            service_domain: var("DNSSD_SERVICE_DOMAIN").unwrap_or_else(|| "local".to_string()),
            mode: var("DNSSD_MODE").unwrap_or_else(|| "once".to_string()),
            resolve_timeout_ms,
            log_level: var("DNSSD_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            anyhow::bail!(
                "DNSSD_SERVICE_NAME is required. \
                Set it via: export DNSSD_SERVICE_NAME=printer"
            );
        }

        if self.service_name.len() > 63 {
            anyhow::bail!(
                "DNSSD_SERVICE_NAME too long: {} bytes (max 63)",
                self.service_name.len()
            );
        }

        self.validate_service_type()?;
        validate_domain_name(&self.service_domain)?;
        self.mode()?;

        if let Some(timeout) = self.resolve_timeout_ms
            && !(1..=600_000).contains(&timeout)
        {
            anyhow::bail!(
                "DNSSD_RESOLVE_TIMEOUT_MS must be between 1 and 600000. Got: {}",
                timeout
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DNSSD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Service types are `_application._tcp` or `_application._udp`
    fn validate_service_type(&self) -> Result<()> {
        let service_type = self.service_type.trim_end_matches('.');
        if service_type.is_empty() {
            anyhow::bail!(
                "DNSSD_SERVICE_TYPE is required. \
                Set it via: export DNSSD_SERVICE_TYPE=_ipp._tcp"
            );
        }

        let labels: Vec<&str> = service_type.split('.').collect();
        let [application, protocol] = labels.as_slice() else {
            anyhow::bail!(
                "DNSSD_SERVICE_TYPE must have exactly two labels like '_ipp._tcp'. Got: {}",
                self.service_type
            );
        };

        if !application.starts_with('_') || application.len() < 2 {
            anyhow::bail!(
                "DNSSD_SERVICE_TYPE application label must start with '_'. Got: {}",
                application
            );
        }

        if *protocol != "_tcp" && *protocol != "_udp" {
            anyhow::bail!(
                "DNSSD_SERVICE_TYPE protocol must be _tcp or _udp. Got: {}",
                protocol
            );
        }

        Ok(())
    }

    fn mode(&self) -> Result<Mode> {
        match self.mode.to_lowercase().as_str() {
            "once" => Ok(Mode::Once),
            "monitor" => Ok(Mode::Monitor),
            other => anyhow::bail!(
                "DNSSD_MODE '{}' is not supported. Supported modes: once, monitor",
                other
            ),
        }
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn resolver_config(&self, mode: Mode) -> ResolverConfig {
        match mode {
            Mode::Once => ResolverConfig {
                resolve_timeout_ms: Some(
                    self.resolve_timeout_ms.unwrap_or(DEFAULT_RESOLVE_TIMEOUT_MS),
                ),
            },
            Mode::Monitor => ResolverConfig::default(),
        }
    }
}

/// Validate a DNS domain name
///
/// Basic RFC 1035 checks; catches common mistakes rather than every
/// malformed name.
fn validate_domain_name(domain: &str) -> Result<()> {
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() {
        anyhow::bail!("DNSSD_SERVICE_DOMAIN cannot be empty");
    }

    if domain.len() > 253 {
        anyhow::bail!("Domain name too long: {} chars (max 253). Got: {}", domain.len(), domain);
    }

    for label in domain.split('.') {
        if label.is_empty() {
            anyhow::bail!("Domain name has empty label: '{}'", domain);
        }

        if label.len() > 63 {
            anyhow::bail!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            );
        }

        if !label.chars().all(|c| c.is_alphanumeric() || c == '-') {
            anyhow::bail!(
                "Domain label contains invalid characters. Label: '{}'. \
                Valid: alphanumeric and hyphen only.",
                label
            );
        }

        if label.starts_with('-') || label.ends_with('-') {
            anyhow::bail!("Domain label cannot start or end with hyphen. Label: '{}'", label);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ResolveExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return ResolveExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ResolveExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ResolveExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("Resolver error: {}", e);
                ResolveExitCode::RuntimeError
            }
        }
    });

    result.into()
}

fn build_registry() -> BackendRegistry {
    let registry = BackendRegistry::new();

    #[cfg(feature = "mdns")]
    {
        info!("Registering mDNS backend");
        dnssd_backend_mdns::register(&registry);
    }

    registry
}

async fn run(config: Config) -> Result<ResolveExitCode> {
    let mode = config.mode()?;
    let registry = build_registry();
    let backend = registry.create_backend(&BackendConfig::Mdns)?;

    let reference = ServiceReference::new(
        config.service_name.clone(),
        config.service_type.clone(),
        config.service_domain.clone(),
    );
    info!("Resolving {}", reference.id());

    let (resolver, mut events) = Resolver::new(reference, backend, config.resolver_config(mode))?;

    match mode {
        Mode::Once => {
            let resolved = resolver.resolve().await;
            match resolver.endpoint() {
                Some(endpoint) if resolved => {
                    println!("{} {}", endpoint.host_name(), endpoint.port())
                }
                _ => println!("unresolved"),
            }

            Ok(if resolved {
                ResolveExitCode::Success
            } else {
                ResolveExitCode::NotResolved
            })
        }
        Mode::Monitor => {
            resolver.resolve_async();

            let shutdown = wait_for_shutdown();
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => report(&event),
                        None => break,
                    },

                    signal = &mut shutdown => {
                        info!("Received shutdown signal: {}", signal?);
                        break;
                    }
                }
            }

            info!("Stopped monitoring {}", resolver.id());
            Ok(ResolveExitCode::Success)
        }
    }
}

fn report(event: &ResolvedEvent) {
    match &event.endpoint {
        Some(endpoint) if event.successful => {
            println!("{} {}", endpoint.host_name(), endpoint.port())
        }
        _ => println!("unresolved"),
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// The name of the signal received
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = config_from(&[
            ("DNSSD_SERVICE_NAME", "printer"),
            ("DNSSD_SERVICE_TYPE", "_ipp._tcp"),
        ])
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.service_domain, "local");
        assert_eq!(config.mode().unwrap(), Mode::Once);
        assert_eq!(
            config.resolver_config(Mode::Once).resolve_timeout_ms,
            Some(DEFAULT_RESOLVE_TIMEOUT_MS)
        );
        assert_eq!(config.resolver_config(Mode::Monitor).resolve_timeout_ms, None);
    }

    #[test]
    fn missing_service_name_is_rejected() {
        let config = config_from(&[("DNSSD_SERVICE_TYPE", "_ipp._tcp")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_service_types_are_rejected() {
        for service_type in ["ipp._tcp", "_ipp", "_ipp._sctp", "_ipp._tcp.local"] {
            let config = config_from(&[
                ("DNSSD_SERVICE_NAME", "printer"),
                ("DNSSD_SERVICE_TYPE", service_type),
            ])
            .unwrap();
            assert!(config.validate().is_err(), "{} should be rejected", service_type);
        }
    }

    #[test]
    fn non_numeric_timeout_fails_to_load() {
        assert!(config_from(&[("DNSSD_RESOLVE_TIMEOUT_MS", "soon")]).is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let config = config_from(&[
            ("DNSSD_SERVICE_NAME", "printer"),
            ("DNSSD_SERVICE_TYPE", "_ipp._tcp"),
            ("DNSSD_MODE", "forever"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn domain_labels_are_checked() {
        assert!(validate_domain_name("local").is_ok());
        assert!(validate_domain_name("local.").is_ok());
        assert!(validate_domain_name("bad..domain").is_err());
        assert!(validate_domain_name("-bad.local").is_err());
    }
}
