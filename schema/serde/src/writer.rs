/// A growable byte buffer used to build outgoing patches.
///
/// Patches have no fixed upper size (a full resync of a large state tree can
/// be arbitrarily big), so the buffer grows as needed.
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_collect() {
        let mut writer = ByteWriter::new();
        writer.write_u8(0x12);
        writer.write_bytes(&[0x34, 0x56]);

        assert_eq!(writer.len(), 3);
        assert_eq!(writer.to_bytes(), vec![0x12, 0x34, 0x56]);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut writer = ByteWriter::new();
        for _ in 0..10_000 {
            writer.write_u8(0xFF);
        }

        let bytes = writer.to_bytes();
        assert_eq!(bytes.len(), 10_000);
        assert!(bytes.iter().all(|&b| b == 0xFF));
    }
}
