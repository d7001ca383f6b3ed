//! LFTP protocol core: LAN discovery announcements, peer registry and the
//! authenticated file transfer protocol.
//! No sockets, no runtime: the host does I/O and drives these types.

pub mod announce;
pub mod error;
pub mod path;
pub mod registry;
pub mod session;
pub mod wire;

pub use announce::{AnnounceError, Announcement};
pub use error::{Error, FilesystemError, ProtocolError, Result};
pub use path::PathError;
pub use registry::{PeerRecord, Registry, SweepEvent, Upsert, DEFAULT_PEER_TTL};
pub use session::{Credentials, Dispatch, Session, SessionState};
pub use wire::{
    decode_auth, decode_header, encode_header, AuthHeader, Command, TransferHeader, WireError,
    AUTH_HEADER_LEN, HEADER_LEN, MAGIC, PROTOCOL_VERSION,
};
