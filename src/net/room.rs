//! Short room codes used as peer identifiers

use std::fmt;

use rand::Rng;

/// Length of every room code / peer id
pub const ROOM_CODE_LEN: usize = 4;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A 4-character uppercase alphanumeric identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    #[error("Room code must be 4 characters, got {0}")]
    Length(usize),

    #[error("Room code may only contain letters and digits")]
    Charset,
}

impl RoomCode {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse user input, normalising case and surrounding whitespace
    pub fn parse(input: &str) -> Result<Self, RoomCodeError> {
        let trimmed = input.trim();
        let len = trimmed.chars().count();
        if len != ROOM_CODE_LEN {
            return Err(RoomCodeError::Length(len));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RoomCodeError::Charset);
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
