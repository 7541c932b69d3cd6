//! SongPod core: TSP message codec and song catalog.
//! No network I/O; the peer crate owns sockets, files and tasks.

pub mod catalog;
pub mod protocol;
pub mod wire;

pub use catalog::{
    format_record, parse_record, CatalogAdvert, CatalogEntry, CatalogError, RecordError,
    SongCatalog,
};
pub use protocol::{Message, MessageType};
pub use wire::{decode_frame, encode_frame, FrameBuffer, FrameDecodeError, FrameEncodeError};
