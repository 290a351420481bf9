//! Neo-Core: AlphaSmart Neo device communication in Rust.
//!
//! This crate talks to an AlphaSmart Neo over USB to back up, edit and
//! restore the files kept by its applets.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Command codes, checksums and the 8-byte message frame
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **State**: Dialogue state tracking
//! - **Events**: Observer pattern for UI decoupling
//! - **Applet / Attributes / Settings**: Device record formats
//! - **Files**: AlphaWord, user dictionary and generic file codecs
//! - **Session**: Dialogues and the public device operations
//! - **Registry**: Device discovery and session bookkeeping
//!
//! # Example
//!
//! ```no_run
//! use neo_core::session::{NeoSession, SessionConfig};
//! use neo_core::transport::NusbTransport;
//!
//! let transport = NusbTransport::open().expect("no Neo found");
//! let mut session = NeoSession::new(transport, SessionConfig::default());
//! session.enumerate_applets().expect("enumeration failed");
//! for applet in session.applets() {
//!     println!("{} {}", applet.id(), applet.name());
//! }
//! ```

pub mod applet;
pub mod attributes;
pub mod events;
pub mod files;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod settings;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use applet::{Applet, AppletHeader, AppletId, HeaderError, Tlv};
pub use attributes::FileAttributes;
pub use events::{LogLevel, NeoEvent, NeoObserver, NullObserver, TracingObserver};
pub use files::{AlphaWordFile, AppletInfo, FileError, GenericFile, NeoFile, UserDictionaryFile};
pub use protocol::Message;
pub use registry::{AcceptAll, DeviceListener, DeviceRegistry, RegistryError, SessionHandle, UsbScanner};
pub use session::{NeoSession, ResourceUsage, SessionConfig, SessionError, SystemMemory, SystemVersion};
pub use settings::{SettingsError, SettingsItem, SettingsList};
pub use state::{DialogueMachine, DialogueState};
pub use transport::{MockTransport, NusbTransport, TransportError};
