/// Protocol tunables and per-session strategy selection.
///
/// Defaults match the reliable indexed variant: a 2 s handshake window with
/// five SYNC attempts, a 50 ms per-chunk ack window with five attempts, and a
/// 2 s receiver inactivity timeout.
///
/// Environment keys (all optional):
///
/// ```text
/// RCTP_CHUNK_INDEXING         indexed | positional
/// RCTP_ACK_CHANNEL            dedicated | piggyback
/// RCTP_GAP_POLICY             buffer | abort
/// RCTP_HANDSHAKE_TIMEOUT_MS   per-SYNC wait for the handshake ACK
/// RCTP_HANDSHAKE_RETRIES      SYNC attempts before HandshakeFailed
/// RCTP_CHUNK_TIMEOUT_MS       per-attempt wait for a chunk or metadata ack
/// RCTP_MAX_RETRIES            attempts per chunk before the transfer aborts
/// RCTP_INACTIVITY_TIMEOUT_MS  receiver silence limit inside a session
/// RCTP_CLOSING_EXCHANGE       true | false, DONE/ACK_DONE after the last chunk
/// RCTP_POLL_INTERVAL_MS       sleep between empty transport polls
/// ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ParseStrategyError};
pub use crate::protocol::ChunkIndexing;

/// How the receiver returns acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckChannel {
    /// Explicit mode switch: transmit the ack, then go back to listening.
    #[default]
    Dedicated,
    /// Attach the ack to the transport's link-layer ack when it can; falls
    /// back to a dedicated packet when the transport has no such facility.
    Piggyback,
}

/// What the receiver does with a chunk index above the one it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Store and ack it; completion still needs every index.
    #[default]
    Buffer,
    /// Treat it as a protocol violation and abort the session.
    Abort,
}

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub indexing: ChunkIndexing,
    pub ack_channel: AckChannel,
    pub gap_policy: GapPolicy,
    pub handshake_timeout: Duration,
    pub handshake_retries: u32,
    pub chunk_timeout: Duration,
    pub max_retries: u32,
    pub inactivity_timeout: Duration,
    pub closing_exchange: bool,
    pub poll_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            indexing: ChunkIndexing::Indexed,
            ack_channel: AckChannel::Dedicated,
            gap_policy: GapPolicy::Buffer,
            handshake_timeout: Duration::from_secs(2),
            handshake_retries: 5,
            chunk_timeout: Duration::from_millis(50),
            max_retries: 5,
            inactivity_timeout: Duration::from_secs(2),
            closing_exchange: true,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl ProtocolConfig {
    /// Load from `RCTP_*` environment variables, reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Missing keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let config = Self {
            indexing: parse_or(&lookup, "RCTP_CHUNK_INDEXING", d.indexing)?,
            ack_channel: parse_or(&lookup, "RCTP_ACK_CHANNEL", d.ack_channel)?,
            gap_policy: parse_or(&lookup, "RCTP_GAP_POLICY", d.gap_policy)?,
            handshake_timeout: millis_or(&lookup, "RCTP_HANDSHAKE_TIMEOUT_MS", d.handshake_timeout)?,
            handshake_retries: parse_or(&lookup, "RCTP_HANDSHAKE_RETRIES", d.handshake_retries)?,
            chunk_timeout: millis_or(&lookup, "RCTP_CHUNK_TIMEOUT_MS", d.chunk_timeout)?,
            max_retries: parse_or(&lookup, "RCTP_MAX_RETRIES", d.max_retries)?,
            inactivity_timeout: millis_or(&lookup, "RCTP_INACTIVITY_TIMEOUT_MS", d.inactivity_timeout)?,
            closing_exchange: parse_or(&lookup, "RCTP_CLOSING_EXCHANGE", d.closing_exchange)?,
            poll_interval: millis_or(&lookup, "RCTP_POLL_INTERVAL_MS", d.poll_interval)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_retries == 0 {
            return Err(ConfigError::OutOfRange {
                key: "handshake_retries",
                reason: "at least one SYNC attempt is required",
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::OutOfRange {
                key: "max_retries",
                reason: "at least one attempt per chunk is required",
            });
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "handshake_timeout",
                reason: "must be non-zero",
            });
        }
        if self.chunk_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "chunk_timeout",
                reason: "must be non-zero",
            });
        }
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "inactivity_timeout",
                reason: "must be non-zero",
            });
        }
        if self.indexing == ChunkIndexing::Positional && !self.closing_exchange {
            return Err(ConfigError::OutOfRange {
                key: "closing_exchange",
                reason: "positional chunks are only released on DONE",
            });
        }
        if self.poll_interval >= self.chunk_timeout {
            return Err(ConfigError::OutOfRange {
                key: "poll_interval",
                reason: "must be shorter than chunk_timeout",
            });
        }
        Ok(())
    }

    /// Data bytes carried by each chunk under the selected indexing mode.
    pub fn chunk_payload_size(&self) -> usize {
        self.indexing.chunk_payload_size()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = default.as_millis() as u64;
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}

impl FromStr for ChunkIndexing {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, ParseStrategyError> {
        match s.to_ascii_lowercase().as_str() {
            "indexed" => Ok(Self::Indexed),
            "positional" => Ok(Self::Positional),
            _ => Err(ParseStrategyError {
                what: "chunk indexing",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ChunkIndexing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed => f.write_str("indexed"),
            Self::Positional => f.write_str("positional"),
        }
    }
}

impl FromStr for AckChannel {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, ParseStrategyError> {
        match s.to_ascii_lowercase().as_str() {
            "dedicated" => Ok(Self::Dedicated),
            "piggyback" => Ok(Self::Piggyback),
            _ => Err(ParseStrategyError {
                what: "ack channel",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AckChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dedicated => f.write_str("dedicated"),
            Self::Piggyback => f.write_str("piggyback"),
        }
    }
}

impl FromStr for GapPolicy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, ParseStrategyError> {
        match s.to_ascii_lowercase().as_str() {
            "buffer" => Ok(Self::Buffer),
            "abort" => Ok(Self::Abort),
            _ => Err(ParseStrategyError {
                what: "gap policy",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for GapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer => f.write_str("buffer"),
            Self::Abort => f.write_str("abort"),
        }
    }
}
