//! Transport wrapper that emits packet events.

use std::sync::Arc;
use std::time::Duration;

use super::traits::{NeoTransport, TransportError};
use crate::events::{NeoEvent, NeoObserver, PacketDirection};
use crate::protocol::constants::{MESSAGE_SIZE, describe};

/// Bytes of payload copied into each packet event.
const PACKET_PREVIEW: usize = 32;

pub struct ObservableTransport<T: NeoTransport, O: NeoObserver> {
    inner: T,
    observer: Arc<O>,
}

impl<T: NeoTransport, O: NeoObserver> ObservableTransport<T, O> {
    pub fn new(inner: T, observer: Arc<O>) -> Self {
        Self { inner, observer }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn emit(&self, direction: PacketDirection, data: &[u8]) {
        let packet_type = if data.len() == MESSAGE_SIZE {
            describe(data[0])
        } else {
            "Data"
        };
        self.observer.on_event(&NeoEvent::Packet {
            direction,
            packet_type: packet_type.to_string(),
            length: data.len(),
            data: Some(data.iter().take(PACKET_PREVIEW).copied().collect()),
        });
    }
}

impl<T: NeoTransport, O: NeoObserver> NeoTransport for ObservableTransport<T, O> {
    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        let res = self.inner.write(data, timeout);
        if res.is_ok() {
            self.emit(PacketDirection::Tx, data);
        }
        res
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        let res = self.inner.read(buf, timeout);
        if let Ok(n) = res
            && n > 0
        {
            self.emit(PacketDirection::Rx, &buf[..n]);
        }
        res
    }

    fn identity(&self) -> u32 {
        self.inner.identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, constants::REQUEST_RESTART};
    use crate::transport::MockTransport;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PacketLog(Mutex<Vec<(PacketDirection, String, usize)>>);

    impl NeoObserver for PacketLog {
        fn on_event(&self, event: &NeoEvent) {
            if let NeoEvent::Packet {
                direction,
                packet_type,
                length,
                ..
            } = event
            {
                self.0
                    .lock()
                    .unwrap()
                    .push((*direction, packet_type.clone(), *length));
            }
        }
    }

    #[test]
    fn test_packets_are_reported() {
        let mock = MockTransport::new();
        mock.queue_bytes(&[1, 2, 3]);
        let log = Arc::new(PacketLog::default());
        let mut transport = ObservableTransport::new(mock, log.clone());

        transport
            .write(Message::new(REQUEST_RESTART).as_bytes(), None)
            .unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(transport.read(&mut buf, None).unwrap(), 3);
        assert!(transport.read(&mut buf, None).is_err());

        let log = log.0.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].0, PacketDirection::Tx);
        assert_eq!(log[0].1, describe(REQUEST_RESTART));
        assert_eq!(log[1], (PacketDirection::Rx, "Data".to_string(), 3));
    }
}
