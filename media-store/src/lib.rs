//! Content-addressed storage for processed videos.
//!
//! Outputs are stored as `<md5>.mp4` in a flat directory, and a small turso
//! database maps each (source hash, audio flag) pair to the content hash of
//! the output made from it.

pub mod db;
pub mod hash;
pub mod index;
pub mod migrations;
pub mod store;

pub use index::{IndexEntry, OriginKey};
pub use store::{ContentStore, StoreConfig, TempOutput};
