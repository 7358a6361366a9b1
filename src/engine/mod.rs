//! Synchronized stimulus playback and acquisition.

pub mod transducer;

pub use transducer::{SynchronizedTransducer, TransducerSettings};
