//! Bus transaction plumbing
//!
//! [`TransactionRequest`] and [`CompletionStatus`] are the two pieces of state
//! shared between the sequencer and a bus driver. [`BlockingSpiBus`] adapts a
//! plain `embedded-hal` SPI device to the asynchronous driver interface.

mod blocking;
mod transaction;

pub use blocking::*;
pub use transaction::*;
