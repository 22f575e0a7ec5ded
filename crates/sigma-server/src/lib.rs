//! sigma-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the server do?
//!
//! It listens on TCP (port 8086 by default) for SigmaTCP frames, reassembles
//! them from the byte stream, and turns each request into transactions on the
//! DSP's SPI control bus: plain register reads and writes, a program-memory
//! checksum bracketed by halting and restarting the DSP core, and the
//! application of programming scripts that flash a new device image.

/// Application layer: bus transport port, device sequencer, request dispatch.
pub mod application;

/// Infrastructure layer: bus drivers, TCP server, configuration storage.
pub mod infrastructure;
