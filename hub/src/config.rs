use crate::error::{ConfigErrorKind, Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// 90% of the pong window so a slow but alive peer has time to answer.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// What the hub does when a client's mailbox is full at publish time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Close the client; the peer reconnects and refetches state.
    #[default]
    Disconnect,
    /// Drop the envelope for that client only and keep the connection.
    DropNewest,
}

#[derive(Debug, PartialEq, Eq)]
pub struct OverflowPolicyParseError;

impl fmt::Display for OverflowPolicyParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected one of: disconnect, drop-newest")
    }
}

impl std::error::Error for OverflowPolicyParseError {}

impl FromStr for OverflowPolicy {
    type Err = OverflowPolicyParseError;
    fn from_str(policy: &str) -> core::result::Result<OverflowPolicy, Self::Err> {
        match policy.to_lowercase().as_str() {
            "disconnect" => Ok(OverflowPolicy::Disconnect),
            "drop-newest" | "drop_newest" => Ok(OverflowPolicy::DropNewest),
            _ => Err(OverflowPolicyParseError),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OverflowPolicy::Disconnect => write!(f, "disconnect"),
            OverflowPolicy::DropNewest => write!(f, "drop-newest"),
        }
    }
}

/// Tunables for client pumps and mailboxes.
#[derive(Clone, Debug, PartialEq)]
pub struct HubConfig {
    /// Deadline for writing a single frame to a connection.
    pub write_wait: Duration,
    /// How long a pong may be outstanding before the client is considered dead.
    pub pong_wait: Duration,
    /// Interval between pings. Must be strictly less than `pong_wait`.
    pub ping_period: Duration,
    /// Largest accepted inbound frame, in bytes.
    pub max_frame_size: usize,
    /// Number of envelopes a client's mailbox holds before the overflow policy applies.
    pub mailbox_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl HubConfig {
    /// Checks the heartbeat timing contract and that every limit is non-zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("write_wait", self.write_wait),
            ("pong_wait", self.pong_wait),
            ("ping_period", self.ping_period),
        ] {
            if value.is_zero() {
                return Err(Error::config(ConfigErrorKind::ZeroDuration(name)));
            }
        }
        if self.ping_period >= self.pong_wait {
            return Err(Error::config(ConfigErrorKind::PingPeriodNotBelowPongWait));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::config(ConfigErrorKind::ZeroMailboxCapacity));
        }
        if self.max_frame_size == 0 {
            return Err(Error::config(ConfigErrorKind::ZeroFrameSize));
        }
        Ok(())
    }

    pub fn with_overflow_policy(mut self, overflow_policy: OverflowPolicy) -> Self {
        self.overflow_policy = overflow_policy;
        self
    }

    pub fn with_mailbox_capacity(mut self, mailbox_capacity: usize) -> Self {
        self.mailbox_capacity = mailbox_capacity;
        self
    }

    pub fn with_heartbeat(mut self, ping_period: Duration, pong_wait: Duration) -> Self {
        self.ping_period = ping_period;
        self.pong_wait = pong_wait;
        self
    }
}
