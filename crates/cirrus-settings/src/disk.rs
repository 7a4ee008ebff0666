//! Desired ephemeral disk layout

use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition type as understood by the partitioner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    Swap,
    #[default]
    Linux,
    Empty,
    Unknown,
    Gpt,
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionType::Swap => "swap",
            PartitionType::Linux => "linux",
            PartitionType::Empty => "empty",
            PartitionType::Unknown => "unknown",
            PartitionType::Gpt => "gpt",
        };
        f.write_str(name)
    }
}

/// A desired partition. A size of zero on the last partition claims the rest of the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    pub size_in_bytes: u64,
    #[serde(rename = "type", default)]
    pub partition_type: PartitionType,
}

impl Partition {
    pub fn new(size_in_bytes: u64, partition_type: PartitionType) -> Self {
        Self {
            size_in_bytes,
            partition_type,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Type: {}, SizeInBytes: {}]",
            self.partition_type, self.size_in_bytes
        )
    }
}

/// Ephemeral device and the layout it should carry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EphemeralDiskSettings {
    pub path: String,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_display() {
        let partition = Partition::new(1024, PartitionType::Swap);
        assert_eq!(partition.to_string(), "[Type: swap, SizeInBytes: 1024]");
    }

    #[test]
    fn test_partition_type_defaults_to_linux() {
        let partition: Partition = serde_json::from_str(r#"{"size_in_bytes": 4096}"#).unwrap();
        assert_eq!(partition.partition_type, PartitionType::Linux);
    }
}
