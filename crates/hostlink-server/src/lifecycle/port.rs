//! Port acquisition on top of the shared registry.
//!
//! The registry tells us which ports live sibling instances hold; the real
//! `bind` decides. A port claimed by a live sibling is skipped without a
//! bind. Every other candidate is retried on `AddrInUse` for the configured
//! budget before it counts as occupied, since a socket closed by a reload can
//! take a moment to be released.

use hostlink_core::config::ServerConfig;
use hostlink_core::registry::{PortRegistry, RegistryEntry};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_millis(800);

/// Why a candidate port was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Recorded by another instance whose process is alive.
    ClaimedBy { instance_key: String, pid: u32 },
    /// Bind still failed with `AddrInUse` once the retry budget was spent.
    InUse,
    /// Bind failed for another reason.
    Unusable(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClaimedBy { instance_key, pid } => {
                write!(f, "claimed by {instance_key} (pid {pid})")
            }
            Self::InUse => write!(f, "in use"),
            Self::Unusable(reason) => write!(f, "unusable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRejection {
    pub port: u16,
    pub reason: Rejection,
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("No usable port in {start}-{end}: {}", describe(.rejections))]
    Exhausted {
        start: u16,
        end: u16,
        rejections: Vec<CandidateRejection>,
    },
}

fn describe(rejections: &[CandidateRejection]) -> String {
    rejections
        .iter()
        .map(|r| format!("{} {}", r.port, r.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A bound listener and the registry entry written for it.
#[derive(Debug)]
pub struct AcquiredPort {
    pub listener: TcpListener,
    pub port: u16,
}

/// Find, bind and register a port for `instance_key`.
///
/// Scans `[config.port, config.port + config.port_range]`. The port this
/// instance held before (`previous`, falling back to its registry entry) is
/// tried first when it lies in the range.
pub fn acquire_port(
    registry: &PortRegistry,
    instance_key: &str,
    config: &ServerConfig,
    previous: Option<u16>,
) -> Result<AcquiredPort, PortError> {
    let start = config.port;
    let end = start.saturating_add(config.port_range);

    let entries = registry.load().unwrap_or_else(|e| {
        warn!("Ignoring unreadable port registry: {e}");
        Vec::new()
    });
    let own_port = previous
        .or_else(|| {
            entries
                .iter()
                .find(|e| e.instance_key == instance_key)
                .map(|e| e.port)
        })
        .filter(|port| *port != 0 && (start..=end).contains(port));

    let candidates = own_port
        .into_iter()
        .chain((start..=end).filter(|port| Some(*port) != own_port));

    let mut rejections = Vec::new();
    for port in candidates {
        if let Some(owner) = live_foreign_claim(&entries, instance_key, port) {
            debug!(port, owner = %owner.instance_key, "skipping port claimed by a live instance");
            rejections.push(CandidateRejection {
                port,
                reason: Rejection::ClaimedBy {
                    instance_key: owner.instance_key.clone(),
                    pid: owner.pid,
                },
            });
            continue;
        }

        match bind_with_retry(port, config.bind_retry_budget()) {
            Ok(listener) => {
                // Port 0 asks the OS for any free port.
                let port = listener.local_addr().map_or(port, |addr| addr.port());
                if let Err(e) = registry.register(instance_key, port) {
                    warn!(port, "Bound port but could not record it in the registry: {e}");
                }
                info!(port, instance_key, "acquired control-plane port");
                return Ok(AcquiredPort { listener, port });
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                rejections.push(CandidateRejection {
                    port,
                    reason: Rejection::InUse,
                });
            }
            Err(e) => {
                debug!(port, "bind failed: {e}");
                rejections.push(CandidateRejection {
                    port,
                    reason: Rejection::Unusable(e.to_string()),
                });
            }
        }
    }

    Err(PortError::Exhausted {
        start,
        end,
        rejections,
    })
}

fn live_foreign_claim<'a>(
    entries: &'a [RegistryEntry],
    instance_key: &str,
    port: u16,
) -> Option<&'a RegistryEntry> {
    entries
        .iter()
        .find(|e| e.port == port && e.instance_key != instance_key && e.is_live())
}

/// Bind `127.0.0.1:port`, retrying `AddrInUse` with exponential backoff
/// (50 ms doubling to 800 ms) until `budget` is spent. A zero budget means a
/// single attempt.
pub fn bind_with_retry(port: u16, budget: Duration) -> io::Result<TcpListener> {
    let deadline = Instant::now() + budget;
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                if attempt > 1 {
                    debug!(port, attempt, "bound port after retrying");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(e);
                }
                debug!(port, attempt, ?delay, "port still in use; retrying");
                std::thread::sleep(delay.min(deadline - now));
                delay = (delay * 2).min(MAX_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
}
