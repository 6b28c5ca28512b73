//! Port declaration validation and normalization.
//!
//! Compose-style port declarations carry free-form `protocol` and `mode`
//! strings. [`PortConfig::validate`] rejects anything the platform cannot
//! honor; [`PortConfig::normalize`] then resolves defaults into a typed
//! [`Port`], collecting a warning for every default that changes what the
//! user wrote.

use std::fmt;

const MAX_TARGET_PORT: u32 = 32767;
const VALID_PROTOCOLS: &[&str] = &["", "tcp", "udp", "http", "http2", "grpc"];
const VALID_MODES: &[&str] = &["", "host", "ingress"];

/// A port declaration as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortConfig {
    pub target: u32,
    /// Published port or `start-end` range; empty when not given
    pub published: String,
    pub protocol: String,
    pub mode: String,
    pub host_ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// No protocol given; treated as HTTP downstream
    Any,
    Tcp,
    Udp,
    Http,
    Http2,
    Grpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ingress,
    Host,
}

/// A validated port with all defaults resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub target: u32,
    pub protocol: Protocol,
    pub mode: Mode,
}

/// Result of [`PortConfig::normalize`]: the port plus any warnings the
/// caller should show the user. Warnings never change success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub port: Port,
    pub warnings: Vec<String>,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Http2 => "http2",
            Protocol::Grpc => "grpc",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Ingress => "ingress",
            Mode::Host => "host",
        })
    }
}

impl PortConfig {
    pub fn new(target: u32) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.target < 1 || self.target > MAX_TARGET_PORT {
            return Err(crate::Error::port(
                "target",
                format!(
                    "must be an integer between 1 and {MAX_TARGET_PORT}: {}",
                    self.target
                ),
            ));
        }
        if !self.host_ip.is_empty() {
            return Err(crate::Error::port("host_ip", "is not supported"));
        }
        if !VALID_PROTOCOLS.contains(&self.protocol.as_str()) {
            return Err(crate::Error::port(
                "protocol",
                format!("not one of [tcp udp http http2 grpc]: {}", self.protocol),
            ));
        }
        if !VALID_MODES.contains(&self.mode.as_str()) {
            return Err(crate::Error::port(
                "mode",
                format!("not one of [host ingress]: {}", self.mode),
            ));
        }
        // Published ports only matter when the port is bound on the host.
        if !self.published.is_empty() && (self.mode == "host" || self.protocol == "udp") {
            self.validate_published()?;
        }
        Ok(())
    }

    fn validate_published(&self) -> crate::Result<()> {
        let (start, end) = match self.published.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (self.published.as_str(), None),
        };
        let start: u16 = start.parse().map_err(|_| {
            crate::Error::port("published", format!("start must be an integer: {start}"))
        })?;
        let start = u32::from(start);

        match end {
            Some(end) => {
                let end: u16 = end.parse().map_err(|_| {
                    crate::Error::port("published", format!("end must be an integer: {end}"))
                })?;
                let end = u32::from(end);
                if start > end {
                    return Err(crate::Error::port(
                        "published",
                        format!("start must be less than end: {}", self.published),
                    ));
                }
                if self.target < start || self.target > end {
                    return Err(crate::Error::port(
                        "published",
                        format!("range must include 'target': {}", self.published),
                    ));
                }
            }
            None if start != self.target => {
                return Err(crate::Error::port(
                    "published",
                    format!("must be empty or equal to 'target': {}", self.published),
                ));
            }
            None => {}
        }
        Ok(())
    }

    /// Validate, then resolve the protocol and mode defaults.
    pub fn normalize(&self) -> crate::Result<Normalized> {
        self.validate()?;

        let mut warnings = Vec::new();
        let mut protocol = match self.protocol.as_str() {
            "" => Protocol::Any,
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "http" => Protocol::Http,
            "http2" => Protocol::Http2,
            "grpc" => Protocol::Grpc,
            other => {
                return Err(crate::Error::Invariant(format!(
                    "port 'protocol' should have been validated but got: {other}"
                )));
            }
        };

        let mode = match self.mode.as_str() {
            "" | "ingress" => {
                if self.mode.is_empty() {
                    warnings.push(
                        "No port 'mode' was specified; defaulting to 'ingress' (add 'mode: ingress' to silence)"
                            .to_owned(),
                    );
                }
                if protocol == Protocol::Udp {
                    warnings.push(
                        "UDP ports default to 'host' mode (add 'mode: host' to silence)".to_owned(),
                    );
                    Mode::Host
                } else {
                    if !self.published.is_empty() {
                        warnings.push("Published ports are ignored in ingress mode".to_owned());
                    }
                    if protocol == Protocol::Tcp {
                        warnings.push(
                            "TCP ingress is not supported; assuming HTTP (remove 'protocol' to silence)"
                                .to_owned(),
                        );
                        protocol = Protocol::Http;
                    }
                    Mode::Ingress
                }
            }
            "host" => Mode::Host,
            other => {
                return Err(crate::Error::Invariant(format!(
                    "port 'mode' should have been validated but got: {other}"
                )));
            }
        };

        for warning in &warnings {
            tracing::warn!(port = self.target, "{warning}");
        }

        Ok(Normalized {
            port: Port {
                target: self.target,
                protocol,
                mode,
            },
            warnings,
        })
    }
}

/// Normalize every declaration, failing on the first invalid one.
pub fn normalize_ports(ports: &[PortConfig]) -> crate::Result<Vec<Normalized>> {
    ports.iter().map(PortConfig::normalize).collect()
}
