mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

// Canonical binary codec used for every persisted record and for the
// deterministic signature preimages of offline transactions.
// The encoding must stay stable: devices in the field verify against it.
pub trait Serializer {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError>
    where
        Self: Sized;

    fn write(&self, writer: &mut Writer);

    fn size(&self) -> usize {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.into_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError>
    where
        Self: Sized,
    {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(ReaderError::TrailingBytes(reader.remaining()));
        }
        Ok(value)
    }
}

impl Serializer for u8 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u8()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(*self);
    }

    fn size(&self) -> usize {
        1
    }
}

impl Serializer for u16 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u16()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u16(*self);
    }

    fn size(&self) -> usize {
        2
    }
}

impl Serializer for u32 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u32()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u32(*self);
    }

    fn size(&self) -> usize {
        4
    }
}

impl Serializer for u64 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u64()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self);
    }

    fn size(&self) -> usize {
        8
    }
}

impl Serializer for i64 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_i64()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_i64(self);
    }

    fn size(&self) -> usize {
        8
    }
}

impl Serializer for bool {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_bool()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bool(*self);
    }

    fn size(&self) -> usize {
        1
    }
}

// Strings are length-prefixed with a single byte: every string field in the
// data model is bounded to 255 bytes or less
impl Serializer for String {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_string()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_string(self);
    }

    fn size(&self) -> usize {
        1 + self.len()
    }
}

impl<T: Serializer> Serializer for Option<T> {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        if reader.read_bool()? {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }

    fn write(&self, writer: &mut Writer) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn size(&self) -> usize {
        1 + self.as_ref().map(|v| v.size()).unwrap_or(0)
    }
}

// Collections are length-prefixed with u16, enough for every bounded list
// in the data model (batch items, product ids, alert targets)
impl<T: Serializer> Serializer for Vec<T> {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let size = reader.read_u16()? as usize;
        let mut values = Vec::with_capacity(size);
        for _ in 0..size {
            values.push(T::read(reader)?);
        }
        Ok(values)
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.len() as u16);
        for value in self {
            value.write(writer);
        }
    }

    fn size(&self) -> usize {
        2 + self.iter().map(|v| v.size()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_roundtrip() {
        let mut writer = Writer::new();
        writer.write_u8(7);
        writer.write_u16(300);
        writer.write_u64(&u64::MAX);
        writer.write_i64(&-42);
        writer.write_bool(true);
        writer.write_string("bar one");

        let bytes = writer.into_bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u16().unwrap(), 300);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_string().unwrap(), "bar one");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_option_roundtrip() {
        let value: Option<u64> = Some(1234);
        let decoded = Option::<u64>::from_bytes(&value.to_bytes()).unwrap();
        assert_eq!(decoded, value);

        let none: Option<u64> = None;
        let decoded = Option::<u64>::from_bytes(&none.to_bytes()).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = 5u64.to_bytes();
        bytes.push(0);
        assert!(matches!(
            u64::from_bytes(&bytes),
            Err(ReaderError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = 5u64.to_bytes();
        assert!(u64::from_bytes(&bytes[..4]).is_err());
    }
}
