//! clicksim-replay: prerecorded click files.
//!
//! Reads and writes the per-sample JSON records consumed by the
//! `REPLAY_FROM_FILE` strategy. [`format`] holds the pure serializers;
//! [`dir`] adds the filesystem-backed [`ReplayDir`] source.

pub mod dir;
pub mod format;

pub use dir::ReplayDir;
pub use format::{RECORD_SUFFIX, ReplayError, parse_record, record_file_name, to_json};
