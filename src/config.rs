// MIT License - Copyright (c) 2021 TJForc
// Receiver configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::constants::DEFAULT_RECEIVER_PORT;
use crate::error::{BridgeError, Result};
use crate::hooks::HookScripts;

/// Configuration of the event receiver service.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Listen address; empty, "0.0.0.0" or "::" listen on all interfaces
    pub addr: String,
    /// Listen port (default: 9010)
    pub port: u16,
    pub hooks: HookScripts,
    /// Time a new session has to identify itself (default: 120 s)
    pub ident_timeout: Duration,
    /// Session idle limit, restarted on every frame (default: 600 s)
    pub comm_timeout: Duration,
    /// Time a partial frame may linger (default: 60 s)
    pub incomplete_timeout: Duration,
    /// Watchdog hook period (default: 3600 s)
    pub watchdog_interval: Duration,
    /// Period of the "no panel connected" check (default: 3600 s)
    pub no_panel_alarm: Duration,
    /// Sessions beyond this many are ignored
    pub max_connections: Option<usize>,
    /// Panel identifiers ("aa:bb:cc") allowed to report; empty allows all
    pub authorized_panels: Vec<String>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            port: DEFAULT_RECEIVER_PORT,
            hooks: HookScripts {
                file: PathBuf::new(),
                central: PathBuf::new(),
                event: PathBuf::new(),
                message: PathBuf::new(),
                watchdog: PathBuf::new(),
            },
            ident_timeout: Duration::from_secs(120),
            comm_timeout: Duration::from_secs(600),
            incomplete_timeout: Duration::from_secs(60),
            watchdog_interval: Duration::from_secs(3600),
            no_panel_alarm: Duration::from_secs(3600),
            max_connections: None,
            authorized_panels: Vec::new(),
        }
    }
}

impl ReceiverConfig {
    pub fn builder() -> ReceiverConfigBuilder {
        ReceiverConfigBuilder::default()
    }

    /// `host:port` suitable for binding.
    pub fn listen_addr(&self) -> String {
        match self.addr.as_str() {
            "" | "0.0.0.0" => format!("0.0.0.0:{}", self.port),
            host if host.contains(':') => format!("[{}]:{}", host, self.port),
            host => format!("{}:{}", host, self.port),
        }
    }

    /// Whether a panel with this identifier may report.
    pub fn is_authorized(&self, mac: &str) -> bool {
        self.authorized_panels.is_empty()
            || self
                .authorized_panels
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(mac))
    }

    /// Parse the TOML form.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let parsed: ConfigToml = toml::from_str(text).map_err(|e| BridgeError::InvalidConfig {
            details: e.to_string(),
        })?;
        parsed.into_config()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

/// Builder for ReceiverConfig.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfigBuilder {
    config: ReceiverConfig,
}

impl ReceiverConfigBuilder {
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.config.addr = addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn hooks(mut self, hooks: HookScripts) -> Self {
        self.config.hooks = hooks;
        self
    }

    pub fn ident_timeout(mut self, timeout: Duration) -> Self {
        self.config.ident_timeout = timeout;
        self
    }

    pub fn comm_timeout(mut self, timeout: Duration) -> Self {
        self.config.comm_timeout = timeout;
        self
    }

    pub fn incomplete_timeout(mut self, timeout: Duration) -> Self {
        self.config.incomplete_timeout = timeout;
        self
    }

    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.config.watchdog_interval = interval;
        self
    }

    pub fn no_panel_alarm(mut self, interval: Duration) -> Self {
        self.config.no_panel_alarm = interval;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = Some(max);
        self
    }

    pub fn authorized_panel(mut self, mac: impl Into<String>) -> Self {
        self.config.authorized_panels.push(mac.into());
        self
    }

    pub fn build(self) -> ReceiverConfig {
        self.config
    }
}

// ---------------------------------------------------------------------------
// TOML form
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigToml {
    receiver: ReceiverToml,
    hooks: HooksToml,
}

#[derive(Debug, Deserialize)]
struct ReceiverToml {
    #[serde(default)]
    addr: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_ident_timeout")]
    ident_timeout_secs: u64,
    #[serde(default = "default_comm_timeout")]
    comm_timeout_secs: u64,
    #[serde(default = "default_incomplete_timeout")]
    incomplete_timeout_secs: u64,
    #[serde(default = "default_watchdog_interval")]
    watchdog_interval_secs: u64,
    #[serde(default = "default_no_panel_alarm")]
    no_panel_alarm_secs: u64,
    #[serde(default)]
    max_connections: Option<usize>,
    #[serde(default)]
    authorized_panels: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_RECEIVER_PORT
}
fn default_ident_timeout() -> u64 {
    120
}
fn default_comm_timeout() -> u64 {
    600
}
fn default_incomplete_timeout() -> u64 {
    60
}
fn default_watchdog_interval() -> u64 {
    3600
}
fn default_no_panel_alarm() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct HooksToml {
    file: PathBuf,
    central: PathBuf,
    event: PathBuf,
    message: PathBuf,
    watchdog: PathBuf,
}

impl ConfigToml {
    fn into_config(self) -> Result<ReceiverConfig> {
        let hooks = HookScripts {
            file: self.hooks.file,
            central: self.hooks.central,
            event: self.hooks.event,
            message: self.hooks.message,
            watchdog: self.hooks.watchdog,
        };
        for (name, path) in [
            ("file", &hooks.file),
            ("central", &hooks.central),
            ("event", &hooks.event),
            ("message", &hooks.message),
            ("watchdog", &hooks.watchdog),
        ] {
            if path.as_os_str().is_empty() {
                return Err(BridgeError::InvalidConfig {
                    details: format!("hook {} has an empty path", name),
                });
            }
        }

        let receiver = self.receiver;
        let port = if receiver.port == 0 {
            warn!("Invalid port 0, using {}", DEFAULT_RECEIVER_PORT);
            DEFAULT_RECEIVER_PORT
        } else {
            receiver.port
        };

        let mut builder = ReceiverConfig::builder()
            .addr(receiver.addr)
            .port(port)
            .hooks(hooks)
            .ident_timeout(Duration::from_secs(receiver.ident_timeout_secs))
            .comm_timeout(Duration::from_secs(receiver.comm_timeout_secs))
            .incomplete_timeout(Duration::from_secs(receiver.incomplete_timeout_secs))
            .watchdog_interval(Duration::from_secs(receiver.watchdog_interval_secs))
            .no_panel_alarm(Duration::from_secs(receiver.no_panel_alarm_secs));
        if let Some(max) = receiver.max_connections {
            builder = builder.max_connections(max);
        }
        for mac in receiver.authorized_panels {
            builder = builder.authorized_panel(mac);
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOOKS: &str = r#"
[hooks]
file = "/usr/local/bin/hook-file"
central = "/usr/local/bin/hook-central"
event = "/usr/local/bin/hook-event"
message = "/usr/local/bin/hook-message"
watchdog = "/usr/local/bin/hook-watchdog"
"#;

    #[test]
    fn test_defaults() {
        let config = ReceiverConfig::from_toml_str(&format!("[receiver]\n{}", HOOKS)).unwrap();
        assert_eq!(config.port, 9010);
        assert_eq!(config.listen_addr(), "0.0.0.0:9010");
        assert_eq!(config.ident_timeout, Duration::from_secs(120));
        assert_eq!(config.comm_timeout, Duration::from_secs(600));
        assert_eq!(config.incomplete_timeout, Duration::from_secs(60));
        assert_eq!(config.max_connections, None);
        assert_eq!(config.hooks.event, PathBuf::from("/usr/local/bin/hook-event"));
    }

    #[test]
    fn test_full_receiver_section() {
        let text = format!(
            "[receiver]\naddr = \"::\"\nport = 9500\nmax_connections = 2\nauthorized_panels = [\"AA:bb:cc\"]\ncomm_timeout_secs = 30\n{}",
            HOOKS
        );
        let config = ReceiverConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.listen_addr(), "[::]:9500");
        assert_eq!(config.max_connections, Some(2));
        assert_eq!(config.comm_timeout, Duration::from_secs(30));
        assert!(config.is_authorized("aa:bb:cc"));
        assert!(!config.is_authorized("aa:bb:cd"));
    }

    #[test]
    fn test_port_zero_falls_back() {
        let text = format!("[receiver]\nport = 0\n{}", HOOKS);
        assert_eq!(ReceiverConfig::from_toml_str(&text).unwrap().port, 9010);
    }

    #[test]
    fn test_missing_hook_is_error() {
        let text = "[receiver]\n[hooks]\nfile = \"a\"\ncentral = \"b\"\nevent = \"c\"\nmessage = \"d\"\n";
        assert!(matches!(
            ReceiverConfig::from_toml_str(text),
            Err(BridgeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_empty_hook_is_error() {
        let text = HOOKS.replace("/usr/local/bin/hook-file", "");
        assert!(ReceiverConfig::from_toml_str(&format!("[receiver]\n{}", text)).is_err());
    }

    #[test]
    fn test_builder() {
        let config = ReceiverConfig::builder()
            .addr("127.0.0.1")
            .port(0)
            .ident_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.listen_addr(), "127.0.0.1:0");
        assert_eq!(config.ident_timeout, Duration::from_secs(5));
        assert!(config.is_authorized("anything"));
    }
}
