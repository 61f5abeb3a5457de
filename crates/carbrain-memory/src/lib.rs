//! `carbrain-memory` – bounded, concurrently shared history.
//!
//! Nothing here grows without bound: every log is a capacity-limited FIFO
//! that evicts its oldest entries first.
//!
//! # Modules
//!
//! - [`history`] – [`HistoryStore`][history::HistoryStore]: the generic
//!   ring buffer behind the command, metrics, LLM-exchange and alert logs.
//!   Each instance carries its own lock, so unrelated logs never serialise
//!   each other's writes.
//! - [`image_index`] – [`ImageIndex`][image_index::ImageIndex]: a history
//!   store of saved camera frames whose eviction also deletes the backing
//!   file (best effort), plus the [`ImagePersistence`][image_index::ImagePersistence]
//!   seam and a directory-backed implementation.
//! - [`stats`] – [`MetricsStats`][stats::MetricsStats]: aggregate view over
//!   the sensor-metrics log.

pub mod history;
pub mod image_index;
pub mod stats;

pub use history::HistoryStore;
pub use image_index::{
    DirectoryImageStore, ImageIndex, ImageIndexEntry, ImagePersistence, ImageStoreError,
};
pub use stats::{MetricsStats, ReadingStats};
