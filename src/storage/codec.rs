use std::fmt;

/// Reversible at-rest transform for file content.
///
/// Both directions work in place on a chunk that starts at `offset` within
/// the whole stream, so files can be transformed while they are streamed.
pub trait ContentCodec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode_in_place(&self, offset: u64, chunk: &mut [u8]);
    fn decode_in_place(&self, offset: u64, chunk: &mut [u8]);

    fn encode(&self, plain: &[u8]) -> Vec<u8> {
        let mut encoded = plain.to_vec();
        self.encode_in_place(0, &mut encoded);
        encoded
    }

    fn decode(&self, encoded: &[u8]) -> Vec<u8> {
        let mut plain = encoded.to_vec();
        self.decode_in_place(0, &mut plain);
        plain
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CodecKeyError {
    Empty,
    ContainsZeroByte { position: usize },
}

impl fmt::Display for CodecKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "codec key must not be empty"),
            Self::ContainsZeroByte { position } => {
                write!(f, "codec key has a zero byte at position {position}")
            }
        }
    }
}

impl std::error::Error for CodecKeyError {}

/// Repeating-key XOR. With no zero byte in the key every encoded byte
/// differs from its plaintext byte.
#[derive(Clone)]
pub struct XorCodec {
    key: Vec<u8>,
}

impl XorCodec {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, CodecKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(CodecKeyError::Empty);
        }
        if let Some(position) = key.iter().position(|byte| *byte == 0) {
            return Err(CodecKeyError::ContainsZeroByte { position });
        }
        Ok(Self { key })
    }

    fn apply(&self, offset: u64, chunk: &mut [u8]) {
        let key_len = self.key.len();
        let start = (offset % key_len as u64) as usize;
        for (index, byte) in chunk.iter_mut().enumerate() {
            *byte ^= self.key[(start + index) % key_len];
        }
    }
}

impl fmt::Debug for XorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XorCodec")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl ContentCodec for XorCodec {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn encode_in_place(&self, offset: u64, chunk: &mut [u8]) {
        self.apply(offset, chunk);
    }

    fn decode_in_place(&self, offset: u64, chunk: &mut [u8]) {
        self.apply(offset, chunk);
    }
}
