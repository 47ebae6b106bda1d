//! # binseries-buffer: Block Streams
//!
//! The byte-buffer collaborator used by the block codec: a fixed-capacity
//! [`CodecWriter`] with rewindable position, a panic-free [`CodecReader`],
//! and the record cursor / result sink seams.

pub mod cursor;
pub mod reader;
pub mod varint;
pub mod writer;

pub use cursor::{RecordCursor, ResultSink, SliceCursor};
pub use reader::{BlockHeader, CodecReader};
pub use writer::{CodecWriter, BLOCK_HEADER_SIZE, MAX_BLOCK_ITEMS};
