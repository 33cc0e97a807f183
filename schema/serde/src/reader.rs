use crate::error::SerdeErr;

/// A cursor over an incoming patch buffer.
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, cursor: 0 }
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buffer.get(self.cursor).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, SerdeErr> {
        let byte = self.peek().ok_or(SerdeErr::UnexpectedEof)?;
        self.cursor += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], SerdeErr> {
        if self.cursor + count > self.buffer.len() {
            return Err(SerdeErr::UnexpectedEof);
        }
        let slice = &self.buffer[self.cursor..self.cursor + count];
        self.cursor += count;
        Ok(slice)
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume the rest of the buffer (unknown trailing data).
    pub fn skip_to_end(&mut self) {
        self.cursor = self.buffer.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_advance() {
        let data = [1u8, 2, 3];
        let mut reader = ByteReader::new(&data);

        assert_eq!(reader.peek(), Some(1));
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.peek(), Some(2));
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn read_past_end_fails() {
        let data = [1u8];
        let mut reader = ByteReader::new(&data);

        reader.read_u8().unwrap();
        assert_eq!(reader.read_u8(), Err(SerdeErr::UnexpectedEof));
        assert!(reader.read_bytes(1).is_err());
    }

    #[test]
    fn skip_to_end_drains() {
        let data = [1u8, 2, 3, 4];
        let mut reader = ByteReader::new(&data);

        reader.read_u8().unwrap();
        reader.skip_to_end();
        assert!(reader.is_empty());
        assert_eq!(reader.peek(), None);
    }
}
