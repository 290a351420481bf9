//! Event system for UI decoupling.
//!
//! Lets a CLI or GUI follow dialogue progress without tight coupling to the
//! session internals.

use std::fmt;

use crate::state::DialogueState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a session or the device registry.
#[derive(Debug, Clone)]
pub enum NeoEvent {
    /// Device connected and enumerated.
    DeviceConnected { identity: u32, applets: usize },
    /// Device went away.
    DeviceDisconnected { identity: u32 },
    /// Dialogue state changed.
    PhaseChanged { from: DialogueState, to: DialogueState },
    /// Progress update for a block transfer.
    Progress {
        operation: String,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Device answered with an error code.
    DeviceError { code: u8, message: String },
    /// USB Packet sent/received.
    Packet {
        direction: PacketDirection,
        packet_type: String,
        length: usize,
        data: Option<Vec<u8>>,
    },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait NeoObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &NeoEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl NeoObserver for NullObserver {
    fn on_event(&self, _event: &NeoEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl NeoObserver for TracingObserver {
    fn on_event(&self, event: &NeoEvent) {
        match event {
            NeoEvent::DeviceConnected { identity, applets } => {
                tracing::info!(identity = %format!("{:08X}", identity), applets, "Device connected");
            }
            NeoEvent::DeviceDisconnected { identity } => {
                tracing::warn!(identity = %format!("{:08X}", identity), "Device disconnected");
            }
            NeoEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            NeoEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            NeoEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            NeoEvent::DeviceError { code, message } => {
                tracing::error!(code = %format!("0x{:02x}", code), "Device error: {}", message);
            }
            NeoEvent::Packet {
                direction,
                packet_type,
                length,
                data,
            } => {
                let hex: String = data
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::trace!(
                    dir = %direction,
                    type_ = %packet_type,
                    len = length,
                    data = %hex,
                    "USB Packet"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl NeoObserver for Recorder {
        fn on_event(&self, event: &NeoEvent) {
            if let NeoEvent::PhaseChanged { to, .. } = event {
                self.0.lock().unwrap().push(to.to_string());
            }
        }
    }

    #[test]
    fn test_observer_receives_events() {
        let recorder = Recorder(Mutex::new(Vec::new()));
        recorder.on_event(&NeoEvent::PhaseChanged {
            from: DialogueState::Disconnected,
            to: DialogueState::Handshaking,
        });
        assert_eq!(*recorder.0.lock().unwrap(), vec!["HANDSHAKING".to_string()]);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(PacketDirection::Tx.to_string(), "TX");
        assert_eq!(PacketDirection::Rx.to_string(), "RX");
    }
}
