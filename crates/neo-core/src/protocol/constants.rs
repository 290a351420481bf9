//! Protocol constants for the Neo "ASM" command set.
//!
//! Request codes travel host to device, response codes device to host.
//! Error codes are sent by the device in place of a response.

// ============================================================================
// Device Identification
// ============================================================================

/// AlphaSmart Inc. Vendor ID
pub const ALPHASMART_VENDOR_ID: u16 = 0x081e;

/// Neo enumerated as a USB keyboard (HID mode)
pub const NEO_HID_PRODUCT_ID: u16 = 0xbd04;

/// Neo enumerated for direct communication (comms mode)
pub const NEO_COMMS_PRODUCT_ID: u16 = 0xbd01;

/// Oldest ASM protocol version the driver can talk to.
pub const MIN_PROTOCOL_VERSION: u16 = 0x0220;

// ============================================================================
// Size Constants
// ============================================================================

/// Size of every command/response frame.
pub const MESSAGE_SIZE: usize = 8;

/// Largest payload carried by a single block transfer.
pub const MAX_BLOCK_SIZE: usize = 1024;

/// Transport-level read/write granularity.
pub const USB_BLOCK_SIZE: usize = 8;

/// Default timeout for transport operations, in ms.
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Timeout used for the hello exchange, in ms.
pub const HELLO_TIMEOUT_MS: u64 = 100;

/// Largest number of applet headers requested in one LIST_APPLETS.
pub const LIST_APPLETS_BATCH: usize = 7;

// ============================================================================
// Raw Commands (outside the framed message set)
// ============================================================================

/// Hello: requests the protocol version (2-byte big-endian reply).
pub const RAW_HELLO: [u8; 1] = [0x01];

/// Protocol reset, "?\xff\0reset".
pub const RAW_RESET: [u8; 8] = [0x3f, 0xff, 0x00, 0x72, 0x65, 0x73, 0x65, 0x74];

/// Applet switch prefix, "?Swtch"; the applet ID follows big-endian.
pub const RAW_SWITCH: [u8; 6] = [0x3f, 0x53, 0x77, 0x74, 0x63, 0x68];

/// Reply to a successful switch, "Switched".
pub const RAW_SWITCHED: [u8; 8] = [0x53, 0x77, 0x69, 0x74, 0x63, 0x68, 0x65, 0x64];

// ============================================================================
// Request Codes (Host -> Device)
// ============================================================================

pub const REQUEST_VERSION: u8 = 0x00;
pub const REQUEST_01: u8 = 0x01;
pub const REQUEST_BLOCK_WRITE: u8 = 0x02;
pub const REQUEST_03: u8 = 0x03;
pub const REQUEST_LIST_APPLETS: u8 = 0x04;
pub const REQUEST_WRITE_APPLET: u8 = 0x06;
pub const REQUEST_07: u8 = 0x07;
pub const REQUEST_RESTART: u8 = 0x08;
pub const REQUEST_SET_BAUDRATE: u8 = 0x09;
pub const REQUEST_0A: u8 = 0x0a;
pub const REQUEST_0B: u8 = 0x0b;
pub const REQUEST_GET_SETTINGS: u8 = 0x0c;
pub const REQUEST_SET_SETTINGS: u8 = 0x0d;
pub const REQUEST_SET_APPLET: u8 = 0x0e;
pub const REQUEST_READ_APPLET: u8 = 0x0f;
pub const REQUEST_BLOCK_READ: u8 = 0x10;
pub const REQUEST_ERASE_APPLETS: u8 = 0x11;
pub const REQUEST_READ_FILE: u8 = 0x12;
pub const REQUEST_GET_FILE_ATTRIBUTES: u8 = 0x13;
pub const REQUEST_WRITE_FILE: u8 = 0x14;
pub const REQUEST_CONFIRM_WRITE_FILE: u8 = 0x15;
pub const REQUEST_16: u8 = 0x16;
pub const REQUEST_17: u8 = 0x17;
pub const REQUEST_SMALL_ROM_UPDATER: u8 = 0x18;
pub const REQUEST_19: u8 = 0x19;
pub const REQUEST_GET_AVAIL_SPACE: u8 = 0x1a;
pub const REQUEST_GET_USED_SPACE: u8 = 0x1b;
pub const REQUEST_READ_RAW_FILE: u8 = 0x1c;
pub const REQUEST_SET_FILE_ATTRIBUTES: u8 = 0x1d;
pub const REQUEST_COMMIT: u8 = 0x1e;
pub const REQUEST_WRITE_RAW_FILE: u8 = 0x1f;

// ============================================================================
// Response Codes (Device -> Host)
// ============================================================================

pub const RESPONSE_VERSION: u8 = 0x40;
pub const RESPONSE_BLOCK_WRITE: u8 = 0x42;
pub const RESPONSE_BLOCK_WRITE_DONE: u8 = 0x43;
pub const RESPONSE_LIST_APPLETS: u8 = 0x44;
pub const RESPONSE_WRITE_APPLET: u8 = 0x46;
pub const RESPONSE_47: u8 = 0x47;
pub const RESPONSE_48: u8 = 0x48;
pub const RESPONSE_SET_BAUDRATE: u8 = 0x4a;
pub const RESPONSE_GET_SETTINGS: u8 = 0x4b;
pub const RESPONSE_SET_APPLET: u8 = 0x4c;
pub const RESPONSE_BLOCK_READ: u8 = 0x4d;
pub const RESPONSE_BLOCK_READ_EMPTY: u8 = 0x4e;
pub const RESPONSE_4F: u8 = 0x4f;
pub const RESPONSE_WRITE_FILE: u8 = 0x50;
pub const RESPONSE_CONFIRM_WRITE_FILE: u8 = 0x51;
pub const RESPONSE_RESTART: u8 = 0x52;
pub const RESPONSE_READ_FILE: u8 = 0x53;
pub const RESPONSE_54: u8 = 0x54;
pub const RESPONSE_55: u8 = 0x55;
pub const RESPONSE_SMALL_ROM_UPDATER: u8 = 0x56;
pub const RESPONSE_57: u8 = 0x57;
/// Free space: ROM bytes at (1,4), RAM in 256-byte pages at (5,2).
pub const RESPONSE_GET_AVAIL_SPACE: u8 = 0x58;
/// Used space: RAM bytes at (1,4), file count at (5,2).
pub const RESPONSE_GET_USED_SPACE: u8 = 0x59;
pub const RESPONSE_GET_FILE_ATTRIBUTES: u8 = 0x5a;
pub const RESPONSE_SET_FILE_ATTRIBUTES: u8 = 0x5b;
pub const RESPONSE_COMMIT: u8 = 0x5c;

// ============================================================================
// Error Codes
// ============================================================================

pub const ERROR_INVALID_BAUDRATE: u8 = 0x86;
pub const ERROR_87: u8 = 0x87;
pub const ERROR_INVALID_APPLET: u8 = 0x8a;
pub const ERROR_PROTOCOL: u8 = 0x8f;
/// Also returned when a file index does not exist.
pub const ERROR_PARAMETER: u8 = 0x90;
pub const ERROR_OUTOFMEMORY: u8 = 0x91;
pub const ERROR_94: u8 = 0x94;

// ============================================================================
// Settings Flags (GET_SETTINGS)
// ============================================================================

pub const SETTINGS_FLAGS_0B: u32 = 0x0b;
pub const SETTINGS_FLAGS_0F: u32 = 0x0f;
/// Flags used when requesting system settings.
pub const SETTINGS_FLAGS_SYSTEM: u32 = 0x10;

/// Human readable name for a command, response or error code.
pub fn describe(code: u8) -> &'static str {
    match code {
        REQUEST_VERSION => "VERSION",
        REQUEST_BLOCK_WRITE => "BLOCK_WRITE",
        REQUEST_LIST_APPLETS => "LIST_APPLETS",
        REQUEST_WRITE_APPLET => "WRITE_APPLET",
        REQUEST_RESTART => "RESTART",
        REQUEST_SET_BAUDRATE => "SET_BAUDRATE",
        REQUEST_GET_SETTINGS => "GET_SETTINGS",
        REQUEST_SET_SETTINGS => "SET_SETTINGS",
        REQUEST_SET_APPLET => "SET_APPLET",
        REQUEST_READ_APPLET => "READ_APPLET",
        REQUEST_BLOCK_READ => "BLOCK_READ",
        REQUEST_ERASE_APPLETS => "ERASE_APPLETS",
        REQUEST_READ_FILE => "READ_FILE",
        REQUEST_GET_FILE_ATTRIBUTES => "GET_FILE_ATTRIBUTES",
        REQUEST_WRITE_FILE => "WRITE_FILE",
        REQUEST_CONFIRM_WRITE_FILE => "CONFIRM_WRITE_FILE",
        REQUEST_SMALL_ROM_UPDATER => "SMALL_ROM_UPDATER",
        REQUEST_GET_AVAIL_SPACE => "GET_AVAIL_SPACE",
        REQUEST_GET_USED_SPACE => "GET_USED_SPACE",
        REQUEST_READ_RAW_FILE => "READ_RAW_FILE",
        REQUEST_SET_FILE_ATTRIBUTES => "SET_FILE_ATTRIBUTES",
        REQUEST_COMMIT => "COMMIT",
        REQUEST_WRITE_RAW_FILE => "WRITE_RAW_FILE",
        RESPONSE_VERSION => "R_VERSION",
        RESPONSE_BLOCK_WRITE => "R_BLOCK_WRITE",
        RESPONSE_BLOCK_WRITE_DONE => "R_BLOCK_WRITE_DONE",
        RESPONSE_LIST_APPLETS => "R_LIST_APPLETS",
        RESPONSE_WRITE_APPLET => "R_WRITE_APPLET",
        RESPONSE_SET_BAUDRATE => "R_SET_BAUDRATE",
        RESPONSE_GET_SETTINGS => "R_GET_SETTINGS",
        RESPONSE_SET_APPLET => "R_SET_APPLET",
        RESPONSE_BLOCK_READ => "R_BLOCK_READ",
        RESPONSE_BLOCK_READ_EMPTY => "R_BLOCK_READ_EMPTY",
        RESPONSE_WRITE_FILE => "R_WRITE_FILE",
        RESPONSE_CONFIRM_WRITE_FILE => "R_CONFIRM_WRITE_FILE",
        RESPONSE_RESTART => "R_RESTART",
        RESPONSE_READ_FILE => "R_READ_FILE",
        RESPONSE_SMALL_ROM_UPDATER => "R_SMALL_ROM_UPDATER",
        RESPONSE_GET_AVAIL_SPACE => "R_GET_AVAIL_SPACE",
        RESPONSE_GET_USED_SPACE => "R_GET_USED_SPACE",
        RESPONSE_GET_FILE_ATTRIBUTES => "R_GET_FILE_ATTRIBUTES",
        RESPONSE_SET_FILE_ATTRIBUTES => "R_SET_FILE_ATTRIBUTES",
        RESPONSE_COMMIT => "R_COMMIT",
        ERROR_INVALID_BAUDRATE => "E_INVALID_BAUDRATE",
        ERROR_INVALID_APPLET => "E_INVALID_APPLET",
        ERROR_PROTOCOL => "E_PROTOCOL",
        ERROR_PARAMETER => "E_PARAMETER",
        ERROR_OUTOFMEMORY => "E_OUTOFMEMORY",
        _ => "UNKNOWN",
    }
}

/// Check if a code lies in the device error range.
pub fn is_error(code: u8) -> bool {
    code >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_known_codes() {
        assert_eq!(describe(REQUEST_LIST_APPLETS), "LIST_APPLETS");
        assert_eq!(describe(RESPONSE_BLOCK_READ_EMPTY), "R_BLOCK_READ_EMPTY");
        assert_eq!(describe(ERROR_PARAMETER), "E_PARAMETER");
        assert_eq!(describe(0x7f), "UNKNOWN");
    }

    #[test]
    fn test_error_range() {
        assert!(is_error(ERROR_PARAMETER));
        assert!(!is_error(RESPONSE_COMMIT));
    }
}
