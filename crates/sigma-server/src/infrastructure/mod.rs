//! Infrastructure layer for the bridge daemon.
//!
//! Contains OS-facing adapters: bus drivers, the TCP listener, and
//! configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `sigma_core`, but MUST NOT be imported by the `application` layer outside
//! of tests.

pub mod bus;
pub mod network;
pub mod storage;
