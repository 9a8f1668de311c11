//! Per-pane terminal content: a text-only emulator over a ring of rows plus
//! the raw replay buffer it can be rebuilt from.

mod emulator;
mod grid;
mod replay;

pub use emulator::{Emulator, MAX_CSI_LEN, MAX_OSC_LEN};
pub use grid::RowRing;
pub use replay::ReplayBuffer;
