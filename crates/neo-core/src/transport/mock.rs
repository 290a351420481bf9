//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{NeoTransport, TransportError};
use crate::protocol::constants::{DEFAULT_TIMEOUT_MS, RAW_SWITCHED};
use crate::protocol::{Message, checksum16};

/// Scripted transport for unit testing session logic.
///
/// Clones share the same queues, so a test can keep one handle while the
/// session owns the other.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued packets returned on read.
    read_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    identity: u32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_identity(0x1400_0000)
    }

    pub fn with_identity(identity: u32) -> Self {
        Self {
            read_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            identity,
        }
    }

    /// Queue a packet to be returned by subsequent reads.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.read_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a response frame.
    pub fn queue_message(&self, message: Message) {
        self.queue_bytes(message.as_bytes());
    }

    /// Queue a hello reply carrying `version`.
    pub fn queue_hello(&self, version: u16) {
        self.queue_bytes(&version.to_be_bytes());
    }

    /// Queue the "Switched" acknowledgement.
    pub fn queue_switched(&self) {
        self.queue_bytes(&RAW_SWITCHED);
    }

    /// Queue the replies for a complete dialogue start.
    pub fn queue_dialogue_start(&self) {
        self.queue_hello(0x0230);
        self.queue_switched();
    }

    /// Queue a response frame whose (1,4)/(5,2) arguments describe `data`,
    /// followed by the data itself.
    pub fn queue_sized_reply(&self, code: u8, data: &[u8]) {
        self.queue_message(
            Message::new(code)
                .with_argument(data.len() as u32, 1, 4)
                .with_argument(checksum16(data) as u32, 5, 2),
        );
        if !data.is_empty() {
            self.queue_bytes(data);
        }
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Command bytes of every captured 8-byte write.
    pub fn written_commands(&self) -> Vec<u8> {
        self.get_writes()
            .iter()
            .filter(|w| w.len() == 8)
            .map(|w| w[0])
            .collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Number of queued packets not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.read_queue.lock().unwrap().len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NeoTransport for MockTransport {
    fn write(&mut self, data: &[u8], _timeout: Option<Duration>) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut queue = self.read_queue.lock().unwrap();
        let Some(packet) = queue.front_mut() else {
            let timeout_ms = timeout.map_or(DEFAULT_TIMEOUT_MS, |t| t.as_millis() as u64);
            return Err(TransportError::Timeout { timeout_ms });
        };

        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        packet.drain(..n);
        if packet.is_empty() {
            queue.pop_front();
        }
        Ok(n)
    }

    fn identity(&self) -> u32 {
        self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_mock_read_queue() {
        let mut mock = MockTransport::new();
        mock.queue_message(Message::new(RESPONSE_COMMIT));

        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf, None).unwrap(), 8);
        assert_eq!(buf[0], RESPONSE_COMMIT);

        // Queue is empty now
        assert!(matches!(
            mock.read(&mut buf, None),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_partial_packet() {
        let mut mock = MockTransport::new();
        mock.queue_bytes(&[1, 2, 3, 4, 5]);

        let mut buf = [0u8; 3];
        assert_eq!(mock.read(&mut buf, None).unwrap(), 3);
        assert_eq!(mock.read(&mut buf, None).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(mock.pending_reads(), 0);
    }

    #[test]
    fn test_mock_short_read_exact() {
        let mut mock = MockTransport::new();
        mock.queue_hello(0x0230);

        let mut buf = [0u8; 8];
        assert!(matches!(
            mock.read_exact(&mut buf, None),
            Err(TransportError::ShortRead { expected: 8, actual: 2 })
        ));
    }

    #[test]
    fn test_mock_write_capture_shared() {
        let mock = MockTransport::new();
        let mut owned = mock.clone();
        owned.write(b"Hello", None).unwrap();
        owned.write(&RAW_RESET, None).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(mock.written_commands(), vec![0x3f]);
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        mock.disconnect();
        assert!(mock.write(b"test", None).is_err());
    }
}
