//! Logging for the Channel Sounding controller
//!
//! Subscriber setup on top of `tracing`, and packet helpers: every control
//! PDU and HCI packet is logged by name at debug level, with its bytes in
//! hex at trace level.
//!
//! | Target | Useful filter |
//! |--------|---------------|
//! | negotiation, PDU rx/tx | `lecs_cs::controller=debug` |
//! | step generation | `lecs_cs::generator=trace` |
//! | radio time | `lecs_sched=debug` |

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Verbosity of the default filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

// (level, filter directive, tracing level)
const LEVELS: [(LogLevel, &str, Level); 5] = [
    (LogLevel::Trace, "trace", Level::TRACE),
    (LogLevel::Debug, "debug", Level::DEBUG),
    (LogLevel::Info, "info", Level::INFO),
    (LogLevel::Warn, "warn", Level::WARN),
    (LogLevel::Error, "error", Level::ERROR),
];

impl LogLevel {
    fn entry(self) -> (LogLevel, &'static str, Level) {
        LEVELS[self as usize]
    }

    /// Filter directive for this level
    pub fn directive(self) -> &'static str {
        self.entry().1
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        level.entry().2
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = if lower == "warning" { "warn" } else { lower.as_str() };
        LEVELS
            .iter()
            .find(|(_, directive, _)| *directive == name)
            .map(|(level, _, _)| *level)
            .ok_or_else(|| format!("unknown log level: {s}"))
    }
}

/// Installs the global subscriber at `level`.
///
/// `RUST_LOG` wins over `level` when it is set.
///
/// ```no_run
/// use lecs_common::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    init_logging_with_filter(level.directive());
}

/// Installs the global subscriber with an `EnvFilter` directive string.
///
/// ```no_run
/// use lecs_common::logging::init_logging_with_filter;
///
/// init_logging_with_filter("info,lecs_cs::generator=trace");
/// ```
pub fn init_logging_with_filter(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Already installed by the embedding application or another test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .try_init();
}

/// Direction of a logged packet, seen from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the peer or the host
    Rx,
    /// To the peer or the host
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum PacketLayer {
    LinkLayer,
    Hci,
}

impl PacketLayer {
    fn as_str(self) -> &'static str {
        match self {
            PacketLayer::LinkLayer => "LL",
            PacketLayer::Hci => "HCI",
        }
    }
}

fn log_packet(layer: PacketLayer, direction: Direction, name: &str, data: &[u8]) {
    let layer = layer.as_str();
    tracing::debug!(layer, %direction, len = data.len(), "{direction} {layer} {name}");
    tracing::trace!(layer, bytes = %HexDump(data), "{name}");
}

/// Logs a link-layer control PDU
pub fn log_pdu(direction: Direction, name: &str, data: &[u8]) {
    log_packet(PacketLayer::LinkLayer, direction, name, data);
}

/// Logs an HCI command or event packet
pub fn log_hci(direction: Direction, name: &str, data: &[u8]) {
    log_packet(PacketLayer::Hci, direction, name, data);
}

/// Lowercase hex rendering of a byte slice.
///
/// Slices longer than [`HexDump::LIMIT`] are cut and end with the number
/// of octets left out, so result events with hundreds of steps stay on one
/// readable line.
pub struct HexDump<'a>(pub &'a [u8]);

impl HexDump<'_> {
    /// Octets rendered before the dump is cut
    pub const LIMIT: usize = 64;
}

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= Self::LIMIT {
            return f.write_str(&hex::encode(self.0));
        }
        let (shown, rest) = self.0.split_at(Self::LIMIT);
        write!(f, "{}..(+{})", hex::encode(shown), rest.len())
    }
}
