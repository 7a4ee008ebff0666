//! Ephemeral disk partitioning
//!
//! ```text
//! EphemeralDevicePartitioner ── identity, wipe, remove
//!            │
//!            ▼
//!  PartitionTableDriver (parted) ── read table, compare, mklabel/mkpart
//! ```

mod ephemeral;
mod parted;

pub use cirrus_settings::{Partition, PartitionType};
pub use ephemeral::{AgentIdentity, EphemeralDevicePartitioner};
pub use parted::{parse_parted_output, PartedPartitioner};

use crate::error::Result;
use async_trait::async_trait;

/// A partition as currently found on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPartition {
    /// Partition number in the table, starting at 1
    pub index: u32,
    pub name: String,
    pub size_in_bytes: u64,
    pub partition_type: PartitionType,
}

#[async_trait]
pub trait Partitioner: Send + Sync {
    /// Bring `device_path` to the desired layout
    async fn partition(&self, device_path: &str, partitions: &[Partition]) -> Result<()>;

    async fn get_device_size_in_bytes(&self, device_path: &str) -> Result<u64>;
}

/// Low-level partition table access used by [`EphemeralDevicePartitioner`]
#[async_trait]
pub trait PartitionTableDriver: Partitioner {
    /// Prefix given to the names of partitions created from now on
    fn set_partition_name_prefix(&self, prefix: &str);

    /// Current partitions and the device size in bytes
    async fn get_partitions(&self, device_path: &str) -> Result<(Vec<ExistingPartition>, u64)>;

    fn partitions_match(
        &self,
        existing: &[ExistingPartition],
        desired: &[Partition],
        device_size_in_bytes: u64,
    ) -> bool;
}
