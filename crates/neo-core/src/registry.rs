//! Device registry: tracks connected Neos and their sessions.
//!
//! A host-side discovery loop reports devices as they appear and vanish.
//! Keyboard-mode devices are offered to a [`DeviceListener`] first; comms-mode
//! devices are connected, enumerated and handed out by [`SessionHandle`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nusb::{MaybeFuture, list_devices};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{NeoEvent, NeoObserver, TracingObserver};
use crate::session::{NeoSession, SessionConfig, SessionError};
use crate::transport::nusb::{is_comms_neo, is_hid_neo, location_identity, switch_to_comms};
use crate::transport::{NeoTransport, NusbTransport, TransportError};

/// Most devices tracked at once.
pub const MAX_DEVICES: usize = 256;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry full ({capacity} devices)")]
    Full { capacity: usize },

    #[error("Device {0:08X} already connected")]
    AlreadyConnected(u32),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Opaque reference to a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionHandle(u32);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives device arrival and departure notifications.
pub trait DeviceListener {
    /// A keyboard-mode Neo appeared. Return true to switch it to comms mode.
    fn on_detect(&mut self, identity: u32) -> bool;

    /// A device finished enumeration and is ready for use.
    fn on_connect(&mut self, identity: u32, handle: SessionHandle);

    /// A device went away; its session has already been dropped.
    fn on_disconnect(&mut self, identity: u32, handle: SessionHandle);
}

/// Listener that accepts every device and ignores the rest.
pub struct AcceptAll;

impl DeviceListener for AcceptAll {
    fn on_detect(&mut self, _identity: u32) -> bool {
        true
    }

    fn on_connect(&mut self, _identity: u32, _handle: SessionHandle) {}

    fn on_disconnect(&mut self, _identity: u32, _handle: SessionHandle) {}
}

/// Connected devices keyed by handle.
pub struct DeviceRegistry<T: NeoTransport, O: NeoObserver = TracingObserver> {
    sessions: BTreeMap<SessionHandle, NeoSession<T, O>>,
    listener: Box<dyn DeviceListener>,
    observer: Arc<O>,
    config: SessionConfig,
    capacity: usize,
    next_handle: u32,
}

impl<T: NeoTransport> DeviceRegistry<T, TracingObserver> {
    pub fn new(config: SessionConfig, listener: Box<dyn DeviceListener>) -> Self {
        Self::with_observer(config, listener, Arc::new(TracingObserver))
    }
}

impl<T: NeoTransport, O: NeoObserver> DeviceRegistry<T, O> {
    pub fn with_observer(config: SessionConfig, listener: Box<dyn DeviceListener>, observer: Arc<O>) -> Self {
        Self {
            sessions: BTreeMap::new(),
            listener,
            observer,
            config,
            capacity: MAX_DEVICES,
            next_handle: 1,
        }
    }

    /// Limit the number of tracked devices below [`MAX_DEVICES`].
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.min(MAX_DEVICES);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Handles of every connected device, oldest first.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.keys().copied().collect()
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&NeoSession<T, O>> {
        self.sessions.get(&handle)
    }

    pub fn session_mut(&mut self, handle: SessionHandle) -> Option<&mut NeoSession<T, O>> {
        self.sessions.get_mut(&handle)
    }

    pub fn handle_for(&self, identity: u32) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .find(|(_, session)| session.identity() == identity)
            .map(|(handle, _)| *handle)
    }

    /// Offer a keyboard-mode device to the listener.
    pub fn device_detected(&mut self, identity: u32) -> bool {
        let accepted = self.listener.on_detect(identity);
        debug!(identity = %format!("{:08X}", identity), accepted, "Keyboard-mode device detected");
        accepted
    }

    /// Open a session on a comms-mode device and enumerate its applets.
    #[instrument(skip(self, transport), fields(identity = %format!("{:08X}", transport.identity())))]
    pub fn device_connected(&mut self, transport: T) -> Result<SessionHandle, RegistryError> {
        let identity = transport.identity();
        if self.handle_for(identity).is_some() {
            warn!("Device already connected");
            return Err(RegistryError::AlreadyConnected(identity));
        }
        if self.sessions.len() >= self.capacity {
            warn!(capacity = self.capacity, "Too many devices");
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }

        let mut session = NeoSession::with_observer(transport, self.config.clone(), self.observer.clone());
        let applets = session.enumerate_applets()?;

        let handle = SessionHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.sessions.insert(handle, session);

        info!(handle = %handle, applets, "Device connected");
        self.observer
            .on_event(&NeoEvent::DeviceConnected { identity, applets });
        self.listener.on_connect(identity, handle);
        Ok(handle)
    }

    /// Drop the session for a device that went away.
    pub fn device_removed(&mut self, identity: u32) -> Option<NeoSession<T, O>> {
        let handle = self.handle_for(identity)?;
        let session = self.sessions.remove(&handle)?;

        self.observer
            .on_event(&NeoEvent::DeviceDisconnected { identity });
        self.listener.on_disconnect(identity, handle);
        Some(session)
    }

    /// Remove a session without notifying the listener, for callers that
    /// take over the device.
    pub fn take(&mut self, handle: SessionHandle) -> Option<NeoSession<T, O>> {
        self.sessions.remove(&handle)
    }
}

/// Polls the USB bus for Neos and keeps a registry in step with it.
pub struct UsbScanner {
    poll_interval: Duration,
    /// Keyboard-mode devices already offered to the listener.
    offered: HashSet<u32>,
    /// Comms-mode devices that failed to connect.
    failed: HashSet<u32>,
}

impl UsbScanner {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            offered: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    /// Examine the bus once.
    pub fn poll<O: NeoObserver>(
        &mut self,
        registry: &mut DeviceRegistry<NusbTransport, O>,
    ) -> Result<(), RegistryError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let mut present = HashSet::new();
        for info in devices {
            let identity = location_identity(&info);
            if is_hid_neo(&info) {
                present.insert(identity);
                if self.offered.insert(identity) && registry.device_detected(identity) {
                    if let Err(e) = switch_to_comms(&info) {
                        warn!(identity = %format!("{:08X}", identity), error = %e, "Mode switch failed");
                    }
                }
            } else if is_comms_neo(&info) {
                present.insert(identity);
                if registry.handle_for(identity).is_some() || self.failed.contains(&identity) {
                    continue;
                }
                let connected = NusbTransport::open_device_info(info)
                    .map_err(RegistryError::from)
                    .and_then(|transport| registry.device_connected(transport));
                if let Err(e) = connected {
                    warn!(identity = %format!("{:08X}", identity), error = %e, "Failed to connect device");
                    self.failed.insert(identity);
                }
            }
        }

        let gone: Vec<u32> = registry
            .sessions
            .values()
            .map(|session| session.identity())
            .filter(|identity| !present.contains(identity))
            .collect();
        for identity in gone {
            registry.device_removed(identity);
        }
        self.offered.retain(|identity| present.contains(identity));
        self.failed.retain(|identity| present.contains(identity));
        Ok(())
    }

    /// Poll until `done` returns true.
    pub fn run_until<O: NeoObserver>(
        &mut self,
        registry: &mut DeviceRegistry<NusbTransport, O>,
        mut done: impl FnMut(&mut DeviceRegistry<NusbTransport, O>) -> bool,
    ) -> Result<(), RegistryError> {
        loop {
            self.poll(registry)?;
            if done(registry) {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Default for UsbScanner {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applet::tests::header_bytes;
    use crate::events::NullObserver;
    use crate::protocol::constants::RESPONSE_LIST_APPLETS;
    use crate::transport::MockTransport;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        accept: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl DeviceListener for Recorder {
        fn on_detect(&mut self, identity: u32) -> bool {
            self.log.lock().unwrap().push(format!("detect {:x}", identity));
            self.accept
        }

        fn on_connect(&mut self, identity: u32, handle: SessionHandle) {
            self.log
                .lock()
                .unwrap()
                .push(format!("connect {:x} {}", identity, handle));
        }

        fn on_disconnect(&mut self, identity: u32, handle: SessionHandle) {
            self.log
                .lock()
                .unwrap()
                .push(format!("disconnect {:x} {}", identity, handle));
        }
    }

    fn registry(listener: &Recorder) -> DeviceRegistry<MockTransport, NullObserver> {
        let config = SessionConfig {
            hello_retry_delay_ms: 0,
            ..Default::default()
        };
        DeviceRegistry::with_observer(config, Box::new(listener.clone()), Arc::new(NullObserver))
    }

    fn neo(identity: u32, applets: u16) -> MockTransport {
        let mock = MockTransport::with_identity(identity);
        let headers: Vec<u8> = (0..applets)
            .flat_map(|i| header_bytes(0xa000 + i, "Applet", 0))
            .collect();
        mock.queue_dialogue_start();
        mock.queue_sized_reply(RESPONSE_LIST_APPLETS, &headers);
        mock
    }

    #[test]
    fn test_connect_enumerates_applets() {
        let listener = Recorder::default();
        let mut registry = registry(&listener);

        let handle = registry.device_connected(neo(0xab, 3)).unwrap();
        assert_eq!(registry.handles(), vec![handle]);
        assert_eq!(registry.session(handle).unwrap().applets().len(), 3);
        assert_eq!(registry.handle_for(0xab), Some(handle));
        assert_eq!(*listener.log.lock().unwrap(), vec![format!("connect ab {}", handle)]);
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let listener = Recorder::default();
        let mut registry = registry(&listener);

        registry.device_connected(neo(1, 1)).unwrap();
        assert!(matches!(
            registry.device_connected(neo(1, 1)),
            Err(RegistryError::AlreadyConnected(1))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let listener = Recorder::default();
        let mut registry = registry(&listener);
        registry.set_capacity(2);

        registry.device_connected(neo(1, 1)).unwrap();
        registry.device_connected(neo(2, 1)).unwrap();
        assert!(matches!(
            registry.device_connected(neo(3, 1)),
            Err(RegistryError::Full { capacity: 2 })
        ));
    }

    #[test]
    fn test_failed_enumeration_not_registered() {
        let listener = Recorder::default();
        let mut registry = registry(&listener);

        let silent = MockTransport::with_identity(7);
        assert!(matches!(
            registry.device_connected(silent),
            Err(RegistryError::Session(SessionError::Handshake(_)))
        ));
        assert!(registry.is_empty());
        assert!(listener.log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_device() {
        let listener = Recorder::default();
        let mut registry = registry(&listener);

        let first = registry.device_connected(neo(1, 1)).unwrap();
        let second = registry.device_connected(neo(2, 2)).unwrap();
        assert_ne!(first, second);

        let session = registry.device_removed(1).unwrap();
        assert_eq!(session.identity(), 1);
        assert!(registry.device_removed(1).is_none());
        assert_eq!(registry.handles(), vec![second]);
        assert!(registry.session_mut(first).is_none());
        assert!(registry.take(second).is_some());
        assert!(registry.is_empty());
        assert_eq!(
            listener.log.lock().unwrap().last().unwrap(),
            &format!("disconnect 1 {}", first)
        );
    }

    #[test]
    fn test_detect_asks_listener() {
        let refusing = Recorder::default();
        assert!(!registry(&refusing).device_detected(5));

        let accepting = Recorder {
            accept: true,
            ..Default::default()
        };
        assert!(registry(&accepting).device_detected(5));
        assert_eq!(*accepting.log.lock().unwrap(), vec!["detect 5".to_string()]);
    }
}
