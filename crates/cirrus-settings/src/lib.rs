//! Cirrus desired-state model
//!
//! The orchestrator describes what a VM should look like as a settings
//! document: named networks and the layout of the ephemeral disk. This
//! crate owns those types and the [`SettingsSource`] capability that
//! produces them.

pub mod disk;
pub mod error;
pub mod network;
pub mod source;

pub use disk::{EphemeralDiskSettings, Partition, PartitionType};
pub use error::Error;
pub use network::{DefaultFor, Network, NetworkType, Networks, Route};
pub use source::{FileSettingsSource, Settings, SettingsSource};

pub type Result<T> = std::result::Result<T, Error>;
