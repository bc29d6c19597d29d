//! Daemon configuration.
//!
//! Loaded from a TOML file. Every input and the output pick a transport;
//! `udp` is the default, so the minimal form stays address-and-port:
//!
//! ```toml
//! [[input]]
//! id = "cam1"
//! name = "Camera 1"
//! ip_address = "127.0.0.1"
//! port = 5001
//! service_id = 1
//! allowed_sources = ["10.0.0.1"]
//!
//! [[input]]
//! id = "replay"
//! name = "Replay feed"
//! transport = "fifo"
//! path = "/var/run/replay.ts"
//! service_id = 2
//!
//! [output]
//! name = "program out"
//! ip_address = "239.0.0.1"
//! port = 6000
//!
//! [pll]
//! mbps = 19.392658
//!
//! [dwrr]
//! max_take = 64
//! ```
//!
//! Stream transports (`tcp`, `unix`) take an optional `mode` of `server`
//! (the default: the daemon listens and the peer connects) or `client`
//! (the daemon dials). `http` is writer-only and valid for the output
//! section alone.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

fn default_gain() -> i64 {
    1
}

fn default_max_take() -> usize {
    64
}

/// Transport carrying an endpoint's packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Datagram socket (the default).
    #[default]
    Udp,
    /// TCP stream socket.
    Tcp,
    /// Unix-domain stream socket.
    Unix,
    /// Regular file.
    File,
    /// Named pipe.
    Fifo,
    /// Chunked HTTP server; writer-only.
    Http,
}

impl TransportKind {
    /// Whether this transport addresses a filesystem path instead of an
    /// IP address and port.
    pub fn uses_path(self) -> bool {
        matches!(self, TransportKind::Unix | TransportKind::File | TransportKind::Fifo)
    }

    /// Whether this transport takes a server/client mode.
    pub fn is_stream(self) -> bool {
        matches!(self, TransportKind::Tcp | TransportKind::Unix)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Unix => write!(f, "unix"),
            TransportKind::File => write!(f, "file"),
            TransportKind::Fifo => write!(f, "fifo"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// Connection topology for stream transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// The daemon listens; the peer connects.
    #[default]
    Server,
    /// The daemon dials the peer.
    Client,
}

/// One reader endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStreamConfig {
    /// Stable identifier used in logs.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Transport the input arrives on.
    #[serde(default)]
    pub transport: TransportKind,
    /// Address the reader binds (udp, tcp).
    #[serde(default)]
    pub ip_address: String,
    /// Port the reader binds (udp, tcp).
    #[serde(default)]
    pub port: u16,
    /// Filesystem path (unix, file, fifo).
    #[serde(default)]
    pub path: Option<String>,
    /// Server or client topology (tcp, unix); defaults to server.
    #[serde(default)]
    pub mode: Option<StreamMode>,
    /// MPEG service the input carries.
    pub service_id: u16,
    /// Source IPs the UDP reader admits. Only listed sources pass; a
    /// reader with an empty allow-list drops every datagram.
    #[serde(default)]
    pub allowed_sources: Vec<String>,
}

impl InputStreamConfig {
    /// Socket address string the reader binds.
    pub fn bind_address(&self) -> String {
        format_addr(&self.ip_address, self.port)
    }

    fn validate(&self) -> Result<()> {
        validate_endpoint(
            &format!("input '{}'", self.id),
            self.transport,
            &self.ip_address,
            self.path.as_deref(),
            self.mode,
        )?;
        if self.transport == TransportKind::Http {
            return Err(PipelineError::Config(format!(
                "input '{}': http transport is writer-only",
                self.id
            )));
        }
        Ok(())
    }
}

/// The writer endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStreamConfig {
    /// Human-readable name.
    pub name: String,
    /// Transport the output leaves on.
    #[serde(default)]
    pub transport: TransportKind,
    /// Destination address (udp, tcp) or bind address (http).
    #[serde(default)]
    pub ip_address: String,
    /// Destination or bind port.
    #[serde(default)]
    pub port: u16,
    /// Filesystem path (unix, file, fifo).
    #[serde(default)]
    pub path: Option<String>,
    /// Server or client topology (tcp, unix); defaults to server.
    #[serde(default)]
    pub mode: Option<StreamMode>,
}

impl OutputStreamConfig {
    /// Socket address string the writer targets or binds.
    pub fn destination(&self) -> String {
        format_addr(&self.ip_address, self.port)
    }

    fn validate(&self) -> Result<()> {
        validate_endpoint(
            &format!("output '{}'", self.name),
            self.transport,
            &self.ip_address,
            self.path.as_deref(),
            self.mode,
        )
    }
}

fn format_addr(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("[{ip}]:{port}")
    } else {
        format!("{ip}:{port}")
    }
}

fn validate_endpoint(
    what: &str,
    transport: TransportKind,
    ip_address: &str,
    path: Option<&str>,
    mode: Option<StreamMode>,
) -> Result<()> {
    if transport.uses_path() {
        if path.map_or(true, str::is_empty) {
            return Err(PipelineError::Config(format!(
                "{what}: {transport} transport requires a path"
            )));
        }
    } else if ip_address.is_empty() {
        return Err(PipelineError::Config(format!(
            "{what}: {transport} transport requires an ip_address"
        )));
    }
    if mode.is_some() && !transport.is_stream() {
        return Err(PipelineError::Config(format!(
            "{what}: mode applies to stream transports only, not {transport}"
        )));
    }
    Ok(())
}

/// PLL pacer parameters. Gains are integer percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PllConfig {
    /// Target bitrate in Mbps.
    pub mbps: f64,
    /// Proportional gain over 100.
    #[serde(default = "default_gain")]
    pub kp: i64,
    /// Integral gain over 100.
    #[serde(default = "default_gain")]
    pub ki: i64,
    /// Derivative gain over 100.
    #[serde(default = "default_gain")]
    pub kd: i64,
}

/// DWRR scheduler parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwrrConfig {
    /// Per-queue per-cycle take bound.
    #[serde(default = "default_max_take")]
    pub max_take: usize,
}

impl Default for DwrrConfig {
    fn default() -> Self {
        Self {
            max_take: default_max_take(),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Reader endpoints, one DWRR queue each.
    #[serde(rename = "input")]
    pub inputs: Vec<InputStreamConfig>,
    /// Writer endpoint.
    pub output: OutputStreamConfig,
    /// Pacer parameters.
    pub pll: PllConfig,
    /// Scheduler parameters.
    #[serde(default)]
    pub dwrr: DwrrConfig,
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| PipelineError::Config("configuration path is not UTF-8".into()))?;
        let raw = config::Config::builder()
            .add_source(config::File::new(path_str, config::FileFormat::Toml))
            .build()?;
        let parsed: Config = raw.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?;
        let parsed: Config = raw.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Check the cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(PipelineError::Config(
                "at least one [[input]] is required".into(),
            ));
        }
        for input in &self.inputs {
            input.validate()?;
        }
        self.output.validate()?;
        if !(self.pll.mbps > 0.0) {
            return Err(PipelineError::Config(format!(
                "pll.mbps must be positive, got {}",
                self.pll.mbps
            )));
        }
        if self.dwrr.max_take == 0 {
            return Err(PipelineError::Config("dwrr.max_take must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [[input]]
        id = "cam1"
        name = "Camera 1"
        ip_address = "127.0.0.1"
        port = 5001
        service_id = 1
        allowed_sources = ["10.0.0.1"]

        [[input]]
        id = "cam2"
        name = "Camera 2"
        transport = "tcp"
        mode = "client"
        ip_address = "127.0.0.1"
        port = 5002
        service_id = 2

        [[input]]
        id = "replay"
        name = "Replay feed"
        transport = "fifo"
        path = "/var/run/replay.ts"
        service_id = 3

        [output]
        name = "program out"
        ip_address = "239.0.0.1"
        port = 6000

        [pll]
        mbps = 19.392658
        kp = 2
        ki = 1
        kd = 1

        [dwrr]
        max_take = 32
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config.inputs.len(), 3);
        assert_eq!(config.inputs[0].id, "cam1");
        assert_eq!(config.inputs[0].transport, TransportKind::Udp);
        assert_eq!(config.inputs[0].bind_address(), "127.0.0.1:5001");
        assert_eq!(config.inputs[0].allowed_sources, vec!["10.0.0.1"]);
        assert_eq!(config.inputs[1].transport, TransportKind::Tcp);
        assert_eq!(config.inputs[1].mode, Some(StreamMode::Client));
        assert_eq!(config.inputs[2].transport, TransportKind::Fifo);
        assert_eq!(config.inputs[2].path.as_deref(), Some("/var/run/replay.ts"));
        assert_eq!(config.output.transport, TransportKind::Udp);
        assert_eq!(config.output.destination(), "239.0.0.1:6000");
        assert_eq!(config.pll.kp, 2);
        assert_eq!(config.dwrr.max_take, 32);
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
            [[input]]
            id = "a"
            name = "a"
            ip_address = "0.0.0.0"
            port = 5000
            service_id = 1

            [output]
            name = "out"
            ip_address = "127.0.0.1"
            port = 6000

            [pll]
            mbps = 4.0
        "#;
        let config = Config::from_toml_str(minimal).unwrap();
        assert_eq!(config.inputs[0].transport, TransportKind::Udp);
        assert_eq!(config.inputs[0].mode, None);
        assert_eq!(config.pll.kp, 1);
        assert_eq!(config.pll.ki, 1);
        assert_eq!(config.pll.kd, 1);
        assert_eq!(config.dwrr.max_take, 64);
    }

    #[test]
    fn test_rejects_empty_inputs() {
        let bad = r#"
            [output]
            name = "out"
            ip_address = "127.0.0.1"
            port = 6000

            [pll]
            mbps = 4.0
        "#;
        assert!(Config::from_toml_str(bad).is_err());
    }

    #[test]
    fn test_rejects_zero_bitrate() {
        let bad = FULL.replace("mbps = 19.392658", "mbps = 0.0");
        assert!(matches!(
            Config::from_toml_str(&bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_max_take() {
        let bad = FULL.replace("max_take = 32", "max_take = 0");
        assert!(matches!(
            Config::from_toml_str(&bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_http_input() {
        let bad = FULL.replace(
            "transport = \"tcp\"\n        mode = \"client\"",
            "transport = \"http\"",
        );
        assert!(matches!(
            Config::from_toml_str(&bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_path_transport_without_path() {
        let bad = FULL.replace("path = \"/var/run/replay.ts\"", "");
        assert!(matches!(
            Config::from_toml_str(&bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_udp_without_address() {
        let bad = FULL.replace("ip_address = \"127.0.0.1\"\n        port = 5001", "port = 5001");
        assert!(matches!(
            Config::from_toml_str(&bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_mode_on_datagram_transport() {
        let bad = FULL.replace(
            "port = 5001\n        service_id = 1",
            "port = 5001\n        mode = \"server\"\n        service_id = 1",
        );
        assert!(matches!(
            Config::from_toml_str(&bad),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_http_output_accepted() {
        let good = FULL.replace(
            "[output]\n        name = \"program out\"\n        ip_address = \"239.0.0.1\"\n        port = 6000",
            "[output]\n        name = \"program out\"\n        transport = \"http\"\n        ip_address = \"0.0.0.0\"\n        port = 8080",
        );
        let config = Config::from_toml_str(&good).unwrap();
        assert_eq!(config.output.transport, TransportKind::Http);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let input = InputStreamConfig {
            id: "v6".into(),
            name: "v6".into(),
            transport: TransportKind::Udp,
            ip_address: "::1".into(),
            port: 5000,
            path: None,
            mode: None,
            service_id: 1,
            allowed_sources: Vec::new(),
        };
        assert_eq!(input.bind_address(), "[::1]:5000");
    }
}
