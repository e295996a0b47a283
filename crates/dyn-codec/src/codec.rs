use std::fmt;

use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use thiserror::Error;

use crate::Bitmap;

const ALPHABET: Alphabet =
    match Alphabet::new("0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("invalid dyn alphabet"),
    };

const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Symbol for sextet 0. Trailing copies carry no information.
const ZERO_SYMBOL: char = '0';

/// Largest highest position [`decode`] accepts. A 2 MiB bitmap.
pub const MAX_POSITION: u32 = (1 << 24) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is not valid dyn base64")]
    InvalidToken,
    #[error("bit stream ended at position {position}")]
    Truncated { position: u64 },
    #[error("run starting at position {position} extends past highest position {highest}")]
    RunTooLong { position: u64, highest: u32 },
    #[error("run length prefix at position {position} is too long")]
    GammaOverflow { position: u64 },
    #[error("highest position {highest} exceeds {limit}")]
    HighestTooLarge { highest: u32, limit: u32 },
}

/// Text form of a [`Bitmap`], sent as the `__dyn` request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedToken(String);

impl EncodedToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EncodedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EncodedToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encodes positions `0..highest` of `bitmap`.
///
/// The highest position itself is implied by the receiver and never
/// written; position 0 seeds the first run even when it is unset.
pub fn encode(bitmap: &Bitmap) -> EncodedToken {
    let mut runs = RunEncoder::new(bitmap.get(0));
    for position in 1..bitmap.highest() {
        runs.push(bitmap.get(position));
    }
    runs.finish()
}

/// Rebuilds the bitmap encoded in `token`, given its highest position.
///
/// Digits the encoder trimmed off the last run read back as zeros; only a
/// stream that ends inside a length prefix is `Truncated`.
pub fn decode(token: &str, highest: u32) -> Result<Bitmap, DecodeError> {
    if highest > MAX_POSITION {
        return Err(DecodeError::HighestTooLarge {
            highest,
            limit: MAX_POSITION,
        });
    }
    let mut padded = String::with_capacity(token.len() + 3);
    padded.push_str(token);
    while padded.len() % 4 != 0 {
        padded.push(ZERO_SYMBOL);
    }
    let bytes = ENGINE
        .decode(padded.as_bytes())
        .map_err(|_| DecodeError::InvalidToken)?;
    let mut reader = BitReader::new(bytes.into_iter().map(u8::reverse_bits).collect());

    let target = u64::from(highest.max(1));
    let mut value = reader.next().ok_or(DecodeError::Truncated { position: 0 })?;
    let mut bitmap = Bitmap::new();
    let mut position = 0u64;
    while position < target {
        let run = reader.gamma(position)?;
        if position + run > target {
            return Err(DecodeError::RunTooLong { position, highest });
        }
        if value {
            // position + run <= target <= MAX_POSITION
            for p in position..position + run {
                bitmap.set(p as u32);
            }
        }
        position += run;
        value = !value;
    }
    if highest > 0 {
        bitmap.set(highest);
    }
    Ok(bitmap)
}

/// Alternating run-length encoder over a growing bit buffer.
struct RunEncoder {
    current: bool,
    count: u64,
    out: BitWriter,
}

impl RunEncoder {
    fn new(initial: bool) -> Self {
        let mut out = BitWriter::default();
        out.push(initial);
        Self {
            current: initial,
            count: 1,
            out,
        }
    }

    fn push(&mut self, bit: bool) {
        if bit == self.current {
            self.count += 1;
            return;
        }
        self.out.push_gamma(self.count);
        self.current = !self.current;
        self.count = 1;
    }

    fn finish(mut self) -> EncodedToken {
        self.out.push_gamma(self.count);
        let bytes = self.out.into_reversed_bytes();
        let mut text = ENGINE.encode(bytes);
        let trimmed = text.trim_end_matches(ZERO_SYMBOL).len();
        text.truncate(trimmed);
        EncodedToken(text)
    }
}

/// Bit `n` lands at `1 << (n % 8)` of byte `n / 8`.
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    fn push(&mut self, bit: bool) {
        let index = self.len / 8;
        if index == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[index] |= 1 << (self.len % 8);
        }
        self.len += 1;
    }

    /// `bit_length(count) - 1` zeros, then `count` in binary, most
    /// significant bit first.
    fn push_gamma(&mut self, count: u64) {
        debug_assert!(count >= 1, "runs are never empty");
        let width = u64::BITS - count.leading_zeros();
        for _ in 1..width {
            self.push(false);
        }
        for shift in (0..width).rev() {
            self.push((count >> shift) & 1 == 1);
        }
    }

    fn into_reversed_bytes(self) -> Vec<u8> {
        self.bytes.into_iter().map(u8::reverse_bits).collect()
    }
}

struct BitReader {
    bytes: Vec<u8>,
    pos: usize,
}

impl BitReader {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }

    fn next(&mut self) -> Option<bool> {
        let byte = self.bytes.get(self.pos / 8)?;
        let bit = byte & (1 << (self.pos % 8)) != 0;
        self.pos += 1;
        Some(bit)
    }

    fn gamma(&mut self, position: u64) -> Result<u64, DecodeError> {
        let mut zeros = 0u32;
        loop {
            match self.next() {
                Some(true) => break,
                Some(false) => zeros += 1,
                None => return Err(DecodeError::Truncated { position }),
            }
            if zeros >= u64::BITS {
                return Err(DecodeError::GammaOverflow { position });
            }
        }
        let mut run = 1u64;
        for _ in 0..zeros {
            // Trimmed zero digits.
            let bit = self.next().unwrap_or(false);
            run = (run << 1) | u64::from(bit);
        }
        Ok(run)
    }
}
