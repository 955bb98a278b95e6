//! Bounded Ring Buffer
//!
//! Fixed-capacity FIFO storage used for per-PID validation history and
//! short-term record buffers. Pushing into a full buffer evicts the oldest entry.

mod buffer;

pub use buffer::RingBuffer;
