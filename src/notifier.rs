//! OTP Delivery
//!
//! The notifier is an external collaborator: the subsystem hands it a code
//! and a destination, and only learns whether delivery worked. Channel
//! fallback policy lives in the OTP manager, not here.

use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

/// Delivery channel for one-time passcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound passcode delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `code` to `destination` over `channel`. Returns whether the
    /// channel accepted the message.
    async fn send(&self, channel: Channel, destination: &str, code: &str) -> bool;
}

/// File-backed notifier that appends each message to a per-channel outbox.
///
/// Suitable for development and single-host deployments where a relay
/// process drains the outbox; production installs inject their own
/// gateway-backed implementation.
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn append(&self, channel: Channel, destination: &str, code: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(format!("{channel}.out"));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let now = chrono::Utc::now().to_rfc3339();
        writeln!(
            file,
            "[{now}] {} -> {destination} | code={code}",
            channel.as_str().to_uppercase()
        )
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, channel: Channel, destination: &str, code: &str) -> bool {
        match self.append(channel, destination, code) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%channel, "Outbox append failed: {err}");
                false
            }
        }
    }
}
