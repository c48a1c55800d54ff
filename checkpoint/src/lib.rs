//! Checkpointed, resumable execution.
//!
//! Long-running computations (multi-epoch training, corpus builds) are split
//! into named steps whose progress is persisted between steps, so a killed
//! process resumes from the last completed step instead of starting over.
//!
//! - **[`core`]**: Pure logic (identity derivation, record codec, size
//!   accounting). No I/O.
//! - **[`io`]**: Store backends and configuration.
//!
//! [`checkpoint`] binds a value to its identity and store; [`machine`] builds
//! the step runner on top of it and [`looping`] drives a runner to completion.

pub mod checkpoint;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod machine;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
