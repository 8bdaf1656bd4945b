use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Not enough bytes: requested {requested}, remaining {remaining}")]
    NotEnoughBytes { requested: usize, remaining: usize },

    #[error("Invalid value")]
    InvalidValue,

    #[error("Invalid UTF-8 string")]
    InvalidString,

    #[error("Unexpected trailing bytes: {0}")]
    TrailingBytes(usize),
}

// Cursor over a borrowed byte slice, reading big-endian integers
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        if self.remaining() < count {
            return Err(ReaderError::NotEnoughBytes {
                requested: count,
                remaining: self.remaining(),
            });
        }

        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ReaderError> {
        let slice = self.read_bytes(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ReaderError> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    // Strings are u8 length-prefixed, 255 bytes max
    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let size = self.read_u8()? as usize;
        let bytes = self.read_bytes(size)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ReaderError::InvalidString)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_past_end() {
        let mut reader = Reader::new(&[1, 2]);
        assert!(matches!(
            reader.read_u64(),
            Err(ReaderError::NotEnoughBytes {
                requested: 8,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_invalid_bool() {
        let mut reader = Reader::new(&[2]);
        assert!(matches!(reader.read_bool(), Err(ReaderError::InvalidValue)));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = Reader::new(&[2, 0xff, 0xfe]);
        assert!(matches!(
            reader.read_string(),
            Err(ReaderError::InvalidString)
        ));
    }
}
