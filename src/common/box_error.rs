//! boxed error alias used by every fallible call in the crate.
//!
//! The Send + Sync bounds let results cross into the thread that hosts the
//! participant's poll loop.
pub type BoxError = std::boxed::Box<
    dyn std::error::Error // must implement Error to satisfy ?
        + std::marker::Send // needed for threads
        + std::marker::Sync, // needed for threads
>;
