//! Blocking: key generation, the block index, and bounded pair emission.

pub mod emitter;
pub mod index;
pub mod keygen;

pub use emitter::{BlockMeta, CandidatePairs};
pub use index::{Block, BlockIndex, Blocks};
pub use keygen::{Blocking, KeyGenerator};
