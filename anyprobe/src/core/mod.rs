//! Deterministic, pure logic shared by both evaluation strategies.
//!
//! Core modules must be free of I/O and threads. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod tally;
pub mod types;
