//! Network infrastructure for the bridge daemon.
//!
//! # Sub-modules
//!
//! - **`framing`** – Per-connection frame assembler.  Accumulates socket
//!   bytes, finds frame boundaries from the header and yields decoded
//!   requests in arrival order.  Pure state machine, no I/O.
//!
//! - **`server`** – TCP accept loop and per-connection tasks.  Bus work is
//!   moved to the blocking thread pool so a slow SPI transfer never stalls
//!   the runtime.

pub mod framing;
pub mod server;
