//! Device session: dialogue handling and the public device operations.
//!
//! Every operation opens a dialogue (hello, reset, switch to the system
//! applet), exchanges 8-byte messages and block transfers, then ends the
//! dialogue with a reset whether or not it succeeded.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::applet::{Applet, AppletHeader, AppletId, HeaderError, c_string};
use crate::attributes::FileAttributes;
use crate::events::{NeoEvent, NeoObserver, TracingObserver};
use crate::protocol::constants::*;
use crate::protocol::{Message, checksum16};
use crate::settings::{SettingsError, SettingsList, ident, item_type};
use crate::state::{DialogueMachine, DialogueState};
use crate::transport::{NeoTransport, ObservableTransport, TransportError};

/// Largest system version record read.
const VERSION_BUFFER: usize = 1023;
/// Longest system name or date kept.
const VERSION_TEXT_MAX: usize = 63;

/// Configuration for a device session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for ordinary transfers, in milliseconds.
    pub timeout_ms: u64,
    /// Timeout for each hello write and read.
    pub hello_timeout_ms: u64,
    /// Hello attempts before giving up on a device.
    pub hello_attempts: u32,
    /// Pause after the reset between hello attempts.
    pub hello_retry_delay_ms: u64,
    /// Oldest protocol version accepted.
    pub min_protocol_version: u16,
    /// RAM left free on the device when creating a file.
    pub free_ram_reserve: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            hello_timeout_ms: HELLO_TIMEOUT_MS,
            hello_attempts: 10,
            hello_retry_delay_ms: 100,
            min_protocol_version: MIN_PROTOCOL_VERSION,
            free_ram_reserve: 1024,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> AnyResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn code_name(code: &u8) -> String {
    format!("0x{:02x} ({})", code, describe(*code))
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected response: sent {}, received {}, expected {}", code_name(.sent), code_name(.received), code_name(.expected))]
    UnexpectedResponse { sent: u8, received: u8, expected: u8 },

    #[error("Checksum mismatch: expected {expected:04x}, got {actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Unsupported protocol version 0x{0:04x}")]
    UnsupportedProtocol(u16),

    #[error("Reply of {size} bytes exceeds {capacity} byte buffer")]
    Oversize { size: usize, capacity: usize },

    #[error("No such file: applet {applet} index {index}")]
    NoSuchFile { applet: AppletId, index: u8 },

    #[error("Invalid file attributes: {0}")]
    InvalidAttributes(String),

    #[error("Insufficient memory: need {needed} bytes, {available} free")]
    InsufficientMemory { needed: u64, available: u64 },

    #[error("Applet {0} has no free file slot")]
    NoFreeSlot(AppletId),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Operating system identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemVersion {
    pub major: u8,
    pub minor: u8,
    pub name: String,
    pub date: String,
}

/// Free memory on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemMemory {
    pub free_rom: u32,
    pub free_ram: u32,
}

/// Memory used by one applet's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    pub ram: u32,
    pub file_count: u16,
}

/// Session with one Neo.
pub struct NeoSession<T: NeoTransport, O: NeoObserver = TracingObserver> {
    transport: ObservableTransport<T, O>,
    observer: Arc<O>,
    config: SessionConfig,
    machine: DialogueMachine,
    applets: Vec<Applet>,
}

impl<T: NeoTransport> NeoSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: NeoTransport, O: NeoObserver> NeoSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(transport: T, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            transport: ObservableTransport::new(transport, observer.clone()),
            observer,
            config,
            machine: DialogueMachine::new(),
            applets: Vec::new(),
        }
    }

    /// Location-derived identity of the device.
    pub fn identity(&self) -> u32 {
        self.transport.identity()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> DialogueState {
        self.machine.state()
    }

    /// Dialogues opened so far.
    pub fn dialogue_count(&self) -> u64 {
        self.machine.dialogues
    }

    pub fn into_transport(self) -> T {
        self.transport.into_inner()
    }

    // ------------------------------------------------------------------
    // Applet list
    // ------------------------------------------------------------------

    /// Applets found by the last enumeration, in device order.
    pub fn applets(&self) -> &[Applet] {
        &self.applets
    }

    pub fn applet_at(&self, index: usize) -> Option<&Applet> {
        self.applets.get(index)
    }

    pub fn applet_for_id(&self, id: AppletId) -> Option<&Applet> {
        self.applets.iter().find(|a| a.id() == id)
    }

    /// Read every applet header from the device, replacing the cached list.
    /// On failure the headers read so far are kept.
    #[instrument(skip(self), fields(identity = %format!("{:08X}", self.identity())))]
    pub fn enumerate_applets(&mut self) -> Result<usize, SessionError> {
        self.applets.clear();
        self.dialogue(|s| {
            loop {
                let first = s.applets.len();
                let headers = s.read_applet_headers(first, LIST_APPLETS_BATCH)?;
                let count = headers.len();
                s.applets.extend(headers.into_iter().map(Applet::from_header));
                s.progress("enumerate", s.applets.len() as u64, 0);
                if count < LIST_APPLETS_BATCH {
                    break;
                }
            }
            Ok(())
        })?;
        info!(count = self.applets.len(), "Applets enumerated");
        Ok(self.applets.len())
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    /// Read up to `size` bytes of a file.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn read_file(
        &mut self,
        applet: AppletId,
        index: u8,
        raw: bool,
        size: usize,
    ) -> Result<Vec<u8>, SessionError> {
        self.dialogue(|s| s.raw_read_file(applet, index, raw, size))
    }

    /// Replace the contents of an existing file.
    #[instrument(skip(self, data), fields(applet = %applet, len = data.len()))]
    pub fn write_file(
        &mut self,
        applet: AppletId,
        index: u8,
        raw: bool,
        data: &[u8],
    ) -> Result<(), SessionError> {
        self.dialogue(|s| s.raw_write_file(applet, index, raw, data))
    }

    /// Create a new file after the applet's existing ones. Returns its index.
    #[instrument(skip(self, password, data), fields(applet = %applet, len = data.len()))]
    pub fn create_file(
        &mut self,
        applet: AppletId,
        name: &str,
        password: &str,
        data: &[u8],
        raw: bool,
    ) -> Result<u8, SessionError> {
        let usage = self.applet_resource_usage(applet)?;
        let memory = self.system_memory()?;

        let needed = data.len() as u64 + u64::from(self.config.free_ram_reserve);
        if needed > u64::from(memory.free_ram) {
            warn!(needed, free = memory.free_ram, "Not enough device memory");
            return Err(SessionError::InsufficientMemory {
                needed,
                available: u64::from(memory.free_ram),
            });
        }

        let index = u8::try_from(u32::from(usage.file_count) + 1)
            .map_err(|_| SessionError::NoFreeSlot(applet))?;

        let size = u32::try_from(data.len()).map_err(|_| SessionError::Oversize {
            size: data.len(),
            capacity: u32::MAX as usize,
        })?;
        let mut attributes = FileAttributes::new();
        attributes.set_file_name(name);
        attributes.set_password(password);
        attributes.set_alloc_size(size);
        attributes.set_min_size(size);
        attributes.set_file_space(0);

        self.dialogue(|s| {
            s.raw_set_file_attributes(applet, index, &attributes)?;
            s.raw_commit(applet, index)?;
            s.raw_write_file(applet, index, raw, data)
        })?;
        info!(index, name, "File created");
        Ok(index)
    }

    /// Empty one file, keeping its slot.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn clear_file(&mut self, applet: AppletId, index: u8) -> Result<(), SessionError> {
        self.dialogue(|s| {
            let mut attributes = s.raw_get_file_attributes(applet, index)?;
            attributes.set_alloc_size(0);
            attributes.set_min_size(0);
            s.raw_set_file_attributes(applet, index, &attributes)?;
            s.raw_commit(applet, index)?;
            s.raw_write_file(applet, index, true, &[])
        })
    }

    /// Erase every file belonging to an applet.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn clear_all_files(&mut self, applet: AppletId) -> Result<(), SessionError> {
        let mut settings = SettingsList::with_capacity(12);
        settings.new_item(item_type::OPTION, ident::ALPHAWORD_CLEAR_FILES)?;
        settings.append_u16(ident::ON)?;
        settings.append_u16(ident::ON)?;
        settings.append_u16(ident::OFF)?;

        self.dialogue(|s| {
            let data = settings.as_bytes();
            let request = Message::new(REQUEST_SET_SETTINGS)
                .with_argument(data.len() as u32, 1, 4)
                .with_argument(u32::from(checksum16(data)), 5, 2);
            s.exchange(&request, RESPONSE_BLOCK_WRITE)?;
            s.write_raw(data)?;
            s.expect_reply(REQUEST_SET_SETTINGS, RESPONSE_BLOCK_WRITE_DONE)?;

            let request = Message::new(REQUEST_SET_APPLET)
                .with_argument(0, 1, 4)
                .with_argument(u32::from(applet.raw()), 5, 2);
            s.exchange(&request, RESPONSE_SET_APPLET)?;
            Ok(())
        })
    }

    /// Attributes of one file.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn file_attributes(&mut self, applet: AppletId, index: u8) -> Result<FileAttributes, SessionError> {
        self.dialogue(|s| s.raw_get_file_attributes(applet, index))
    }

    /// Write and commit new attributes for a file.
    #[instrument(skip(self, attributes), fields(applet = %applet))]
    pub fn set_file_attributes(
        &mut self,
        applet: AppletId,
        index: u8,
        attributes: &FileAttributes,
    ) -> Result<(), SessionError> {
        check_writable(attributes)?;
        self.dialogue(|s| {
            s.raw_set_file_attributes(applet, index, attributes)?;
            s.raw_commit(applet, index)
        })
    }

    /// Index of the first file named `name`.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn find_file(&mut self, applet: AppletId, name: &str) -> Result<Option<u8>, SessionError> {
        Ok(self
            .list_files(applet)?
            .into_iter()
            .find(|(_, attributes)| attributes.file_name() == name)
            .map(|(index, _)| index))
    }

    /// Attributes of every file of an applet, from index 1 up to the first
    /// missing slot.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn list_files(&mut self, applet: AppletId) -> Result<Vec<(u8, FileAttributes)>, SessionError> {
        self.dialogue(|s| {
            let mut files = Vec::new();
            for index in 1..=u8::MAX {
                match s.raw_get_file_attributes(applet, index) {
                    Ok(attributes) => files.push((index, attributes)),
                    Err(SessionError::NoSuchFile { .. }) => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(files)
        })
    }

    // ------------------------------------------------------------------
    // Settings and system queries
    // ------------------------------------------------------------------

    /// Read an applet's settings list. Fails if the reply exceeds `max` bytes.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn read_settings(
        &mut self,
        applet: AppletId,
        flags: u32,
        max: usize,
    ) -> Result<SettingsList, SessionError> {
        self.dialogue(|s| {
            let request = Message::new(REQUEST_GET_SETTINGS)
                .with_argument(flags, 1, 4)
                .with_argument(u32::from(applet.raw()), 5, 2);
            let reply = s.exchange(&request, RESPONSE_GET_SETTINGS)?;
            let size = reply.argument(1, 4) as usize;
            let expected = reply.argument(5, 2) as u16;

            if size > max {
                warn!(size, max, "Settings reply too large, draining");
                s.drain(size);
                return Err(SessionError::Oversize { size, capacity: max });
            }

            let mut data = vec![0u8; size];
            s.read_exact(&mut data)?;
            verify_checksum(&data, expected)?;
            Ok(SettingsList::from_bytes(data))
        })
    }

    /// Memory used by an applet's files.
    #[instrument(skip(self), fields(applet = %applet))]
    pub fn applet_resource_usage(&mut self, applet: AppletId) -> Result<ResourceUsage, SessionError> {
        self.dialogue(|s| {
            // Argument 1 selects all files rather than the largest one
            let request = Message::new(REQUEST_GET_USED_SPACE)
                .with_argument(1, 1, 4)
                .with_argument(u32::from(applet.raw()), 5, 2);
            let reply = s.exchange(&request, RESPONSE_GET_USED_SPACE)?;
            Ok(ResourceUsage {
                ram: reply.argument(1, 4),
                file_count: reply.argument(5, 2) as u16,
            })
        })
    }

    /// Operating system version, name and build date.
    #[instrument(skip(self))]
    pub fn system_version(&mut self) -> Result<SystemVersion, SessionError> {
        self.dialogue(|s| {
            let reply = s.exchange(&Message::new(REQUEST_VERSION), RESPONSE_VERSION)?;
            let size = (reply.argument(1, 4) as usize).min(VERSION_BUFFER);
            let expected = reply.argument(5, 2) as u16;

            let mut buffer = vec![0u8; size];
            let actual = s.read_some(&mut buffer)?;
            buffer.truncate(actual);

            let checksum = checksum16(&buffer);
            if checksum != expected {
                warn!(expected = %format!("{:04x}", expected), actual = %format!("{:04x}", checksum), "Ignoring version checksum error");
            }

            let text = buffer.get(6..).unwrap_or_default();
            let name_end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            let date = text.get(name_end + 1..).unwrap_or_default();
            let version = SystemVersion {
                major: buffer.get(4).copied().unwrap_or(0),
                minor: buffer.get(5).copied().unwrap_or(0),
                name: version_text(&text[..name_end]),
                date: version_text(date),
            };
            info!(
                major = version.major,
                minor = version.minor,
                name = %version.name,
                date = %version.date,
                "System version"
            );
            Ok(version)
        })
    }

    /// Free ROM and RAM.
    #[instrument(skip(self))]
    pub fn system_memory(&mut self) -> Result<SystemMemory, SessionError> {
        self.dialogue(|s| {
            let reply = s.exchange(&Message::new(REQUEST_GET_AVAIL_SPACE), RESPONSE_GET_AVAIL_SPACE)?;
            Ok(SystemMemory {
                free_rom: reply.argument(1, 4),
                free_ram: reply.argument(5, 2) * 256,
            })
        })
    }

    /// Restart the device.
    #[instrument(skip(self))]
    pub fn restart(&mut self) -> Result<(), SessionError> {
        self.dialogue(|s| {
            s.exchange(&Message::new(REQUEST_RESTART), RESPONSE_RESTART)?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Dialogue
    // ------------------------------------------------------------------

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.timeout_ms))
    }

    fn goto_state(&mut self, state: DialogueState) {
        let from = self.machine.goto_state(state);
        if from != state {
            self.observer.on_event(&NeoEvent::PhaseChanged { from, to: state });
        }
    }

    fn progress(&self, operation: &str, current: u64, total: u64) {
        self.observer.on_event(&NeoEvent::Progress {
            operation: operation.to_string(),
            current,
            total,
        });
    }

    /// Run `op` inside a dialogue with the system applet.
    fn dialogue<R>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let result = self.dialogue_start(AppletId::SYSTEM).and_then(|()| op(self));
        self.dialogue_end(result)
    }

    fn dialogue_start(&mut self, applet: AppletId) -> Result<(), SessionError> {
        self.goto_state(DialogueState::Handshaking);
        self.hello()?;
        self.reset()?;
        self.switch_applet(applet)?;
        self.goto_state(DialogueState::Active);
        Ok(())
    }

    fn dialogue_end<R>(&mut self, result: Result<R, SessionError>) -> Result<R, SessionError> {
        if let Err(e) = &result {
            warn!(error = %e, "Dialogue failed");
        }
        if let Err(e) = self.reset() {
            debug!(error = %e, "Reset at end of dialogue failed");
        }
        self.goto_state(DialogueState::Disconnected);
        result
    }

    /// Ask for the protocol version, resetting between attempts.
    fn hello(&mut self) -> Result<u16, SessionError> {
        let timeout = Some(Duration::from_millis(self.config.hello_timeout_ms));
        for attempt in 1..=self.config.hello_attempts {
            if attempt > 1 {
                let _ = self.reset();
                thread::sleep(Duration::from_millis(self.config.hello_retry_delay_ms));
            }

            let mut buf = [0u8; MESSAGE_SIZE];
            let reply = self
                .transport
                .write(&RAW_HELLO, timeout)
                .and_then(|()| self.transport.read(&mut buf, timeout));
            match reply {
                Ok(2) => {
                    let version = u16::from_be_bytes([buf[0], buf[1]]);
                    if version < self.config.min_protocol_version {
                        warn!(version = %format!("0x{:04x}", version), "Protocol version not supported");
                        return Err(SessionError::UnsupportedProtocol(version));
                    }
                    debug!(version = %format!("0x{:04x}", version), attempt, "Hello");
                    return Ok(version);
                }
                Ok(n) => {
                    debug!(attempt, bytes = %hex(&buf[..n]), "Unexpected hello reply");
                }
                Err(TransportError::Disconnected) => return Err(TransportError::Disconnected.into()),
                Err(e) => {
                    debug!(attempt, error = %e, "No hello reply");
                }
            }
        }
        warn!(attempts = self.config.hello_attempts, "Device did not answer hello");
        Err(SessionError::Handshake(format!(
            "no valid hello reply after {} attempts",
            self.config.hello_attempts
        )))
    }

    fn reset(&mut self) -> Result<(), SessionError> {
        self.write_raw(&RAW_RESET).map_err(|e| {
            warn!(error = %e, "Failed to send reset");
            e.into()
        })
    }

    fn switch_applet(&mut self, applet: AppletId) -> Result<(), SessionError> {
        let mut request = [0u8; MESSAGE_SIZE];
        request[..RAW_SWITCH.len()].copy_from_slice(&RAW_SWITCH);
        request[RAW_SWITCH.len()..].copy_from_slice(&applet.raw().to_be_bytes());
        self.write_raw(&request)?;

        let mut reply = [0u8; MESSAGE_SIZE];
        self.read_exact(&mut reply)?;
        if reply != RAW_SWITCHED {
            let shown: String = reply
                .iter()
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
                .collect();
            warn!(applet = %applet, reply = %shown, "Failed to switch applet");
            return Err(SessionError::Handshake(format!(
                "switch to applet {} answered {:?}",
                applet, shown
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages and block transfers
    // ------------------------------------------------------------------

    fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        self.write_raw(message.as_bytes())?;
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let timeout = self.timeout();
        self.transport.write(data, timeout)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let timeout = self.timeout();
        self.transport.read(buf, timeout)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let timeout = self.timeout();
        self.transport.read_exact(buf, timeout)
    }

    fn receive(&mut self) -> Result<Message, SessionError> {
        let mut raw = [0u8; MESSAGE_SIZE];
        self.read_exact(&mut raw)?;
        let message = Message::from_bytes(raw);
        if !message.is_valid() {
            debug!(message = ?message, "Response frame checksum mismatch");
        }
        Ok(message)
    }

    /// Read a response and check its code.
    fn expect_reply(&mut self, sent: u8, expected: u8) -> Result<Message, SessionError> {
        let reply = self.receive()?;
        check_response(&*self.observer, sent, &reply, expected)?;
        Ok(reply)
    }

    fn exchange(&mut self, request: &Message, expected: u8) -> Result<Message, SessionError> {
        self.send(request)?;
        self.expect_reply(request.command(), expected)
    }

    /// Discard `size` bytes of an unwanted reply.
    fn drain(&mut self, size: usize) {
        let mut scratch = [0u8; MAX_BLOCK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            match self.read_some(&mut scratch[..want]) {
                Ok(0) | Err(_) => break,
                Ok(n) => remaining -= n,
            }
        }
    }

    fn block_write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.goto_state(DialogueState::Transfer);
        let total = data.len() as u64;
        let mut sent = 0u64;
        for chunk in data.chunks(MAX_BLOCK_SIZE) {
            let request = Message::new(REQUEST_BLOCK_WRITE)
                .with_argument(chunk.len() as u32, 1, 4)
                .with_argument(u32::from(checksum16(chunk)), 5, 2);
            self.exchange(&request, RESPONSE_BLOCK_WRITE)?;
            self.write_raw(chunk)?;
            self.expect_reply(REQUEST_BLOCK_WRITE, RESPONSE_BLOCK_WRITE_DONE)?;
            sent += chunk.len() as u64;
            self.progress("write", sent, total);
        }
        self.goto_state(DialogueState::Active);
        Ok(())
    }

    fn block_read(&mut self, capacity: usize) -> Result<Vec<u8>, SessionError> {
        self.goto_state(DialogueState::Transfer);
        let request = Message::new(REQUEST_BLOCK_READ);
        let mut data = Vec::with_capacity(capacity);
        while data.len() < capacity {
            self.send(&request)?;
            let reply = self.receive()?;
            match reply.command() {
                RESPONSE_BLOCK_READ_EMPTY => break,
                RESPONSE_BLOCK_READ => {
                    let size = reply.argument(1, 4) as usize;
                    let expected = reply.argument(5, 2) as u16;
                    let remaining = capacity - data.len();
                    if size > remaining {
                        warn!(size, remaining, "Block larger than remaining buffer");
                        return Err(SessionError::Oversize {
                            size,
                            capacity: remaining,
                        });
                    }
                    if size == 0 {
                        break;
                    }
                    let start = data.len();
                    data.resize(start + size, 0);
                    self.read_exact(&mut data[start..])?;
                    verify_checksum(&data[start..], expected)?;
                    self.progress("read", data.len() as u64, capacity as u64);
                }
                _ => {
                    return Err(unexpected(
                        &*self.observer,
                        REQUEST_BLOCK_READ,
                        &reply,
                        RESPONSE_BLOCK_READ,
                    ));
                }
            }
        }
        self.goto_state(DialogueState::Active);
        Ok(data)
    }

    // ------------------------------------------------------------------
    // Requests valid inside an open dialogue
    // ------------------------------------------------------------------

    fn read_applet_headers(&mut self, first: usize, count: usize) -> Result<Vec<AppletHeader>, SessionError> {
        let request = Message::new(REQUEST_LIST_APPLETS)
            .with_argument(first as u32, 1, 4)
            .with_argument(count as u32, 5, 2);
        let reply = self.exchange(&request, RESPONSE_LIST_APPLETS)?;
        let size = reply.argument(1, 4) as usize;
        let expected = reply.argument(5, 2) as u16;

        let capacity = count * AppletHeader::SIZE;
        if size > capacity {
            warn!(size, capacity, "Applet list reply too large");
            return Err(SessionError::Oversize { size, capacity });
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; size];
        self.read_exact(&mut buffer)?;
        if size % AppletHeader::SIZE != 0 {
            warn!(size, "Applet list ends with a partial header");
        }
        verify_checksum(&buffer, expected)?;

        buffer
            .chunks_exact(AppletHeader::SIZE)
            .map(|chunk| AppletHeader::parse(chunk).map_err(SessionError::from))
            .collect()
    }

    fn raw_get_file_attributes(&mut self, applet: AppletId, index: u8) -> Result<FileAttributes, SessionError> {
        let request = Message::new(REQUEST_GET_FILE_ATTRIBUTES)
            .with_argument(u32::from(index), 4, 1)
            .with_argument(u32::from(applet.raw()), 5, 2);
        self.send(&request)?;
        let reply = self.receive()?;
        if reply.command() == ERROR_PARAMETER {
            return Err(SessionError::NoSuchFile { applet, index });
        }
        check_response(&*self.observer, request.command(), &reply, RESPONSE_GET_FILE_ATTRIBUTES)?;

        let length = reply.argument(1, 4) as usize;
        let expected = reply.argument(5, 2) as u16;
        if length != FileAttributes::SIZE {
            warn!(length, "Unexpected attribute record size");
            return Err(SessionError::InvalidAttributes(format!(
                "record of {} bytes",
                length
            )));
        }

        let mut raw = [0u8; FileAttributes::SIZE];
        self.read_exact(&mut raw)?;
        verify_checksum(&raw, expected)?;
        Ok(FileAttributes::from_bytes(&raw)?)
    }

    fn raw_set_file_attributes(
        &mut self,
        applet: AppletId,
        index: u8,
        attributes: &FileAttributes,
    ) -> Result<(), SessionError> {
        check_writable(attributes)?;
        let request = Message::new(REQUEST_SET_FILE_ATTRIBUTES)
            .with_argument(u32::from(index), 1, 4)
            .with_argument(u32::from(applet.raw()), 5, 2);
        self.exchange(&request, RESPONSE_SET_FILE_ATTRIBUTES)?;
        self.block_write(attributes.as_bytes())
    }

    /// Bind written attributes to the file slot.
    fn raw_commit(&mut self, applet: AppletId, index: u8) -> Result<(), SessionError> {
        let request = Message::new(REQUEST_COMMIT)
            .with_argument(u32::from(index), 4, 1)
            .with_argument(u32::from(applet.raw()), 5, 2);
        self.exchange(&request, RESPONSE_COMMIT)?;
        Ok(())
    }

    fn raw_read_file(&mut self, applet: AppletId, index: u8, raw: bool, size: usize) -> Result<Vec<u8>, SessionError> {
        let code = if raw { REQUEST_READ_RAW_FILE } else { REQUEST_READ_FILE };
        let request = Message::new(code)
            .with_argument(size.min(0x00ff_ffff) as u32, 1, 3)
            .with_argument(u32::from(index), 4, 1)
            .with_argument(u32::from(applet.raw()), 5, 2);
        self.send(&request)?;
        let reply = self.receive()?;
        if reply.command() == ERROR_PARAMETER {
            return Err(SessionError::NoSuchFile { applet, index });
        }
        check_response(&*self.observer, code, &reply, RESPONSE_READ_FILE)?;
        self.block_read(size)
    }

    fn raw_write_file(&mut self, applet: AppletId, index: u8, raw: bool, data: &[u8]) -> Result<(), SessionError> {
        if data.len() > 0x00ff_ffff {
            return Err(SessionError::Oversize {
                size: data.len(),
                capacity: 0x00ff_ffff,
            });
        }
        let code = if raw { REQUEST_WRITE_RAW_FILE } else { REQUEST_WRITE_FILE };
        let request = Message::new(code)
            .with_argument(u32::from(index), 1, 1)
            .with_argument(data.len() as u32, 2, 3)
            .with_argument(u32::from(applet.raw()), 5, 2);
        self.send(&request)?;
        let reply = self.receive()?;
        if reply.command() == ERROR_PARAMETER {
            return Err(SessionError::NoSuchFile { applet, index });
        }
        check_response(&*self.observer, code, &reply, RESPONSE_WRITE_FILE)?;
        self.block_write(data)?;
        self.exchange(&Message::new(REQUEST_CONFIRM_WRITE_FILE), RESPONSE_CONFIRM_WRITE_FILE)?;
        Ok(())
    }
}

fn check_response<O: NeoObserver + ?Sized>(
    observer: &O,
    sent: u8,
    reply: &Message,
    expected: u8,
) -> Result<(), SessionError> {
    if reply.command() == expected {
        return Ok(());
    }
    Err(unexpected(observer, sent, reply, expected))
}

fn unexpected<O: NeoObserver + ?Sized>(
    observer: &O,
    sent: u8,
    reply: &Message,
    expected: u8,
) -> SessionError {
    let received = reply.command();
    if is_error(received) {
        observer.on_event(&NeoEvent::DeviceError {
            code: received,
            message: describe(received).to_string(),
        });
    }
    warn!(
        sent = %code_name(&sent),
        received = %code_name(&received),
        expected = %code_name(&expected),
        "Unexpected response"
    );
    SessionError::UnexpectedResponse {
        sent,
        received,
        expected,
    }
}

/// An empty name or password crashes the device.
fn check_writable(attributes: &FileAttributes) -> Result<(), SessionError> {
    if !attributes.is_writable() {
        return Err(SessionError::InvalidAttributes(
            "filename and password must not be empty".into(),
        ));
    }
    Ok(())
}

fn verify_checksum(data: &[u8], expected: u16) -> Result<(), SessionError> {
    let actual = checksum16(data);
    if actual != expected {
        warn!(expected = %format!("{:04x}", expected), actual = %format!("{:04x}", actual), "Data checksum error");
        return Err(SessionError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Device text field: up to the NUL, capped, trailing whitespace removed.
fn version_text(bytes: &[u8]) -> String {
    let text: String = c_string(bytes).chars().take(VERSION_TEXT_MAX).collect();
    text.trim_end().to_string()
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
