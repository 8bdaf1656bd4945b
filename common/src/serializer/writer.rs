// Append-only byte buffer, the counterpart of Reader.
// Integers are written big-endian so that lexicographic ordering of encoded
// keys matches numeric ordering, which the storage layer relies on for
// time-indexed scans.
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: &u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: &i64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.bytes.push(value as u8);
    }

    // Strings are u8 length-prefixed, 255 bytes max.
    // Longer input is a caller bug; the data model bounds every string field.
    pub fn write_string(&mut self, value: &str) {
        debug_assert!(
            value.len() <= u8::MAX as usize,
            "string field exceeds 255 bytes"
        );
        self.bytes.push(value.len() as u8);
        self.bytes.extend_from_slice(value.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}
