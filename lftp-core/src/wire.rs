//! Framing: fixed 32-byte transfer header and 65-byte auth header, big-endian.
//!
//! Transfer header layout:
//!
//! | offset | size | field          |
//! |--------|------|----------------|
//! | 0      | 4    | magic          |
//! | 4      | 2    | version        |
//! | 6      | 2    | command        |
//! | 8      | 4    | filesize       |
//! | 12     | 2    | filename_len   |
//! | 14     | 18   | reserved (0)   |

/// Protocol magic, "LFTP" in ASCII.
pub const MAGIC: u32 = 0x4C46_5450;
/// Version written into every header. Not enforced on receipt.
pub const PROTOCOL_VERSION: u16 = 1;
/// Size of an encoded [`TransferHeader`].
pub const HEADER_LEN: usize = 32;

/// Width of each credential field in an [`AuthHeader`].
pub const CREDENTIAL_FIELD_LEN: usize = 32;
/// Size of an encoded [`AuthHeader`]: username + password + result byte.
pub const AUTH_HEADER_LEN: usize = CREDENTIAL_FIELD_LEN * 2 + 1;

/// Longest filename accepted after a header.
pub const MAX_FILENAME_LEN: usize = 255;

/// Command tag carried in every transfer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    PutFile,
    GetFile,
    Ack,
    Nak,
    /// Any code this side does not understand. Answered with `Nak`.
    Unknown(u16),
}

impl Command {
    pub fn code(self) -> u16 {
        match self {
            Command::PutFile => 0x01,
            Command::GetFile => 0x02,
            Command::Ack => 0x03,
            Command::Nak => 0x04,
            Command::Unknown(c) => c,
        }
    }

    /// True for responses, which never carry a filename.
    pub fn is_response(self) -> bool {
        matches!(self, Command::Ack | Command::Nak)
    }
}

impl From<u16> for Command {
    fn from(code: u16) -> Self {
        match code {
            0x01 => Command::PutFile,
            0x02 => Command::GetFile,
            0x03 => Command::Ack,
            0x04 => Command::Nak,
            other => Command::Unknown(other),
        }
    }
}

/// One framed protocol message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHeader {
    pub version: u16,
    pub command: Command,
    pub filesize: u32,
    pub filename_len: u16,
}

impl TransferHeader {
    pub fn new(command: Command, filesize: u32, filename_len: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
            filesize,
            filename_len,
        }
    }

    /// `Ack`/`Nak` header with zero size and no filename.
    pub fn response(command: Command) -> Self {
        Self::new(command, 0, 0)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&self.command.code().to_be_bytes());
        out[8..12].copy_from_slice(&self.filesize.to_be_bytes());
        out[12..14].copy_from_slice(&self.filename_len.to_be_bytes());
        out
    }
}

/// Encode a header for `command` with the current protocol version.
pub fn encode_header(command: Command, filesize: u32, filename_len: u16) -> [u8; HEADER_LEN] {
    TransferHeader::new(command, filesize, filename_len).encode()
}

/// Decode a header from the front of `bytes`. Magic is checked before anything else.
pub fn decode_header(bytes: &[u8]) -> Result<TransferHeader, WireError> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::ShortRead {
            expected: HEADER_LEN,
            got: bytes.len(),
        });
    }
    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MAGIC {
        return Err(WireError::BadMagic(magic));
    }
    Ok(TransferHeader {
        version: u16::from_be_bytes([bytes[4], bytes[5]]),
        command: Command::from(u16::from_be_bytes([bytes[6], bytes[7]])),
        filesize: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        filename_len: u16::from_be_bytes([bytes[12], bytes[13]]),
    })
}

/// Credentials outbound, a 0/1 result inbound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeader {
    pub username: String,
    pub password: String,
    pub result: u8,
}

impl AuthHeader {
    pub fn request(username: &str, password: &str) -> Self {
        Self {
            username: truncate_field(username).to_string(),
            password: truncate_field(password).to_string(),
            result: 0,
        }
    }

    pub fn response(accepted: bool) -> Self {
        Self {
            result: u8::from(accepted),
            ..Self::default()
        }
    }

    pub fn accepted(&self) -> bool {
        self.result == 1
    }

    pub fn encode(&self) -> [u8; AUTH_HEADER_LEN] {
        let mut out = [0u8; AUTH_HEADER_LEN];
        write_field(&mut out[..CREDENTIAL_FIELD_LEN], &self.username);
        write_field(
            &mut out[CREDENTIAL_FIELD_LEN..CREDENTIAL_FIELD_LEN * 2],
            &self.password,
        );
        out[AUTH_HEADER_LEN - 1] = self.result;
        out
    }
}

/// Decode an auth header. No magic; only the fixed size is checked.
pub fn decode_auth(bytes: &[u8]) -> Result<AuthHeader, WireError> {
    if bytes.len() < AUTH_HEADER_LEN {
        return Err(WireError::ShortRead {
            expected: AUTH_HEADER_LEN,
            got: bytes.len(),
        });
    }
    Ok(AuthHeader {
        username: read_field(&bytes[..CREDENTIAL_FIELD_LEN]),
        password: read_field(&bytes[CREDENTIAL_FIELD_LEN..CREDENTIAL_FIELD_LEN * 2]),
        result: bytes[AUTH_HEADER_LEN - 1],
    })
}

// Leave room for the NUL terminator older peers rely on.
fn truncate_field(s: &str) -> &str {
    let max = CREDENTIAL_FIELD_LEN - 1;
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn write_field(dst: &mut [u8], value: &str) {
    let value = truncate_field(value).as_bytes();
    dst[..value.len()].copy_from_slice(value);
}

fn read_field(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Error decoding a fixed-size header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
}
