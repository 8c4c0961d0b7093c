//! Buffer subsystem.
//!
//! # Data Flow
//! ```text
//! BufferPool (shared by all workers)
//!     → take() a fixed-size block
//!     → DirectionalBuffer wraps it (read/write/append/view)
//!     → ConnectionBuffers holds upstream + downstream for one pair
//!     → release() on pair teardown hands blocks back
//! ```
//!
//! # Design Decisions
//! - One block size for the whole process
//! - Pool exhaustion degrades to unpooled heap blocks, never blocks
//! - Buffers release themselves on drop so forced teardown cannot leak

pub mod connection;
pub mod directional;
pub mod pool;

pub use connection::ConnectionBuffers;
pub use directional::{BufferError, DirectionalBuffer, ReadStatus};
pub use pool::{Block, BufferPool};
