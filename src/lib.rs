//! Reader for Axona DacqUSB recording sessions.
//!
//! A session is a family of files sharing one base name: the `.set` master
//! file, one `.<N>` spike file per tetrode, `.eeg`/`.egf` continuous signals,
//! the `.pos` tracking file, the `.inp` event file and `_<N>.cut` cluster
//! assignments. Binary files share a text header ending in `data_start`, a
//! body of fixed-width records and a closing `data_end` sentinel.

pub mod catalog;
pub mod cut;
pub mod gain;
pub mod header;
pub mod reader;
pub mod record;
mod session;
pub mod types;

use std::path::Path;

// Re-export types
pub use catalog::ChannelGroup;
pub use header::{HeaderAttributes, HeaderValue};
pub use session::Session;
pub use types::*;

/// Opens an Axona session from its `.set` file
///
/// Only the `.set` file is read here; spike, signal, tracking, event and
/// cut data are decoded when first requested.
///
/// # Examples
///
/// ```no_run
/// use axona_importer::open;
///
/// let result = open("path/to/your/recording.set");
/// match result {
///     Ok(session) => println!("Duration: {} s", session.duration()),
///     Err(e) => println!("Error opening session: {}", e),
/// }
/// ```
pub fn open<P: AsRef<Path>>(path: P) -> Result<Session> {
    Session::open(path)
}
