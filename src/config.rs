//! Server configuration.
//!
//! [`Config`] is the flat, fully-defaulted option set read from the command line.
//! [`Config::validate`] turns it into an immutable [`EndpointConfig`], the only
//! configuration type the server accepts.
use std::{fmt, path::PathBuf};

use clap::Args;
use thiserror::Error;

pub const DEFAULT_MODE: u32 = 0o600;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 20000;
pub const DEFAULT_BACKLOG: u32 = 256;
pub const DEFAULT_MSG_MAX_LEN: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("message delimiter must not be empty")]
    EmptyDelimiter,

    #[error("maximum message length must be greater than zero")]
    ZeroMaxLength,

    #[error("invalid escape sequence in delimiter '{0}'")]
    InvalidEscape(String),

    #[error("invalid socket mode '{0}'")]
    InvalidMode(String),
}

/// Options recognized by the server.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Unix socket to listen on; TCP is used when absent
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Permission bits of the unix socket (e.g. 0o600, 0600 or 384)
    #[arg(long, default_value = "0o600", value_parser = parse_mode)]
    pub mode: u32,
    /// TCP host to listen on
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Max number of pending TCP connections
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: u32,
    /// Prepare process-wide I/O resources before binding
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub patch_all: bool,
    /// Message delimiter; accepts \n, \r, \t, \0, \\ and \xHH escapes
    #[arg(long, default_value = "\\n")]
    pub msg_end: String,
    /// Max number of bytes buffered for one message
    #[arg(long, default_value_t = DEFAULT_MSG_MAX_LEN)]
    pub msg_max_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: None,
            mode: DEFAULT_MODE,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            patch_all: true,
            msg_end: "\\n".to_string(),
            msg_max_len: DEFAULT_MSG_MAX_LEN,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<EndpointConfig, ConfigError> {
        let endpoint = match &self.socket {
            Some(path) => Endpoint::Unix {
                path: path.clone(),
                mode: self.mode,
            },
            None => Endpoint::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
        };

        EndpointConfig::new(
            endpoint,
            self.backlog,
            unescape(&self.msg_end)?,
            self.msg_max_len,
        )
    }
}

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix { path: PathBuf, mode: u32 },
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// Human readable form used in the startup banner.
    pub fn descriptor(&self) -> String {
        match self {
            Endpoint::Unix { path, .. } => format!("unix:{} -> ", path.display()),
            Endpoint::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Validated, immutable server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    endpoint: Endpoint,
    backlog: u32,
    delimiter: Vec<u8>,
    max_message_length: usize,
}

impl EndpointConfig {
    pub fn new(
        endpoint: Endpoint,
        backlog: u32,
        delimiter: Vec<u8>,
        max_message_length: usize,
    ) -> Result<Self, ConfigError> {
        if delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        if max_message_length == 0 {
            return Err(ConfigError::ZeroMaxLength);
        }

        Ok(Self {
            endpoint,
            backlog,
            delimiter,
            max_message_length,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }
}

/// Startup banner line, e.g. `echo on tcp://127.0.0.1:20000`.
pub fn banner(name: &str, endpoint: &Endpoint) -> String {
    format!("{name} on {}", endpoint.descriptor())
}

/// Accepts `0o600`, `0600` (octal) or `384` (decimal).
pub fn parse_mode(s: &str) -> Result<u32, ConfigError> {
    let s = s.trim();
    let parsed = if let Some(octal) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        u32::from_str_radix(octal, 8)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse::<u32>()
    };

    match parsed {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(ConfigError::InvalidMode(s.to_string())),
    }
}

/// Decodes the delimiter escapes accepted on the command line.
pub fn unescape(s: &str) -> Result<Vec<u8>, ConfigError> {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();

    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }

        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hex = [bytes.next(), bytes.next()];
                let byte = match hex {
                    [Some(hi), Some(lo)] => std::str::from_utf8(&[hi, lo])
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok()),
                    _ => None,
                };
                out.push(byte.ok_or_else(|| ConfigError::InvalidEscape(s.to_string()))?);
            }
            _ => return Err(ConfigError::InvalidEscape(s.to_string())),
        }
    }

    Ok(out)
}
