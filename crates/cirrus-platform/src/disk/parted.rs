//! GPT partition tables through `parted`

use super::{ExistingPartition, Partition, PartitionTableDriver, PartitionType, Partitioner};
use crate::error::{PlatformError, Result, ResultExt};
use crate::retry::{AttemptError, RetryConfig, RetryStrategy};
use crate::system::{Clock, CmdRunner};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

/// Partitions start on 1 MiB boundaries and the last MiB holds the backup GPT
const ALIGNMENT: u64 = MIB;

/// Existing partitions within this distance of the desired size count as equal
const SIZE_TOLERANCE: u64 = 20 * MIB;

const UNLABELED_DISK: &str = "unrecognised disk label";

/// `None` when the aligned offset does not fit in a `u64`
fn align_up(offset: u64) -> Option<u64> {
    offset.div_ceil(ALIGNMENT).checked_mul(ALIGNMENT)
}

fn partition_type_from_fs(fs: &str) -> PartitionType {
    match fs {
        "" => PartitionType::Empty,
        fs if fs.starts_with("linux-swap") => PartitionType::Swap,
        "ext2" | "ext3" | "ext4" | "xfs" | "btrfs" => PartitionType::Linux,
        _ => PartitionType::Unknown,
    }
}

fn mkpart_fs_type(partition_type: PartitionType) -> &'static str {
    match partition_type {
        PartitionType::Swap => "linux-swap",
        _ => "ext4",
    }
}

fn parse_bytes(field: &str) -> Result<u64> {
    field
        .trim()
        .trim_end_matches('B')
        .parse()
        .map_err(|_| PlatformError::Parse(format!("invalid byte count '{}'", field)))
}

/// Parse `parted -m <dev> unit B print` output into partitions and device size
pub fn parse_parted_output(stdout: &str) -> Result<(Vec<ExistingPartition>, u64)> {
    let mut lines = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .skip_while(|l| *l == "BYT;");

    let device_line = lines
        .next()
        .ok_or_else(|| PlatformError::Parse("parted printed no device line".to_string()))?;
    let device_size = device_line
        .split(':')
        .nth(1)
        .ok_or_else(|| PlatformError::Parse(format!("malformed device line '{}'", device_line)))
        .and_then(parse_bytes)?;

    let mut partitions = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.trim_end_matches(';').split(':').collect();
        if fields.len() < 6 {
            return Err(PlatformError::Parse(format!(
                "malformed partition line '{}'",
                line
            )));
        }
        let index = fields[0]
            .parse()
            .map_err(|_| PlatformError::Parse(format!("invalid partition number in '{}'", line)))?;
        partitions.push(ExistingPartition {
            index,
            name: fields[5].to_string(),
            size_in_bytes: parse_bytes(fields[3])?,
            partition_type: partition_type_from_fs(fields[4]),
        });
    }

    Ok((partitions, device_size))
}

/// Sizes the desired partitions will take on a device of `device_size` bytes.
///
/// A trailing zero size becomes whatever is left after the others. `None`
/// when the layout overflows the byte range.
fn planned_sizes(desired: &[Partition], device_size: u64) -> Option<Vec<u64>> {
    let usable_end = device_size.saturating_sub(ALIGNMENT);
    let mut start = ALIGNMENT;
    let mut sizes = Vec::with_capacity(desired.len());
    for (i, partition) in desired.iter().enumerate() {
        let size = if partition.size_in_bytes == 0 && i + 1 == desired.len() {
            usable_end.saturating_sub(start)
        } else {
            partition.size_in_bytes
        };
        sizes.push(size);
        start = align_up(start.checked_add(size)?)?;
    }
    Some(sizes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedPartition {
    name: String,
    fs_type: &'static str,
    start: u64,
    end: u64,
}

/// Partition table driver backed by `parted`, `lsblk` and `partprobe`
pub struct PartedPartitioner {
    runner: Arc<dyn CmdRunner>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    name_prefix: Mutex<String>,
}

impl PartedPartitioner {
    pub fn new(runner: Arc<dyn CmdRunner>, clock: Arc<dyn Clock>, retry: RetryConfig) -> Self {
        Self {
            runner,
            clock,
            retry,
            name_prefix: Mutex::new(String::new()),
        }
    }

    fn partition_name(&self, number: usize) -> String {
        let prefix = self
            .name_prefix
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();
        if prefix.is_empty() {
            format!("partition-{}", number)
        } else {
            format!("{}-{}", prefix, number)
        }
    }

    fn plan(
        &self,
        device_path: &str,
        partitions: &[Partition],
        device_size: u64,
    ) -> Result<Vec<PlannedPartition>> {
        if let Some(i) = partitions[..partitions.len().saturating_sub(1)]
            .iter()
            .position(|p| p.size_in_bytes == 0)
        {
            return Err(PlatformError::InvalidLayout {
                device: device_path.to_string(),
                reason: format!("partition {} has no size and is not the last one", i + 1),
            });
        }

        let usable_end = device_size.saturating_sub(ALIGNMENT);
        let required = partitions
            .iter()
            .map(|p| align_up(p.size_in_bytes).unwrap_or(u64::MAX))
            .fold(2 * ALIGNMENT, u64::saturating_add);
        let insufficient_space = || PlatformError::InsufficientSpace {
            device: device_path.to_string(),
            required,
            available: device_size,
        };

        let sizes = planned_sizes(partitions, device_size).ok_or_else(insufficient_space)?;

        let mut start = ALIGNMENT;
        let mut planned = Vec::with_capacity(partitions.len());
        for ((i, partition), size) in partitions.iter().enumerate().zip(sizes) {
            let end = match start.checked_add(size) {
                Some(next) if size > 0 && next <= usable_end => next - 1,
                _ => return Err(insufficient_space()),
            };
            planned.push(PlannedPartition {
                name: self.partition_name(i + 1),
                fs_type: mkpart_fs_type(partition.partition_type),
                start,
                end,
            });
            start = align_up(end + 1).ok_or_else(insufficient_space)?;
        }
        Ok(planned)
    }

    async fn run_parted_with_retry(&self, args: &[&str]) -> Result<()> {
        let strategy = RetryStrategy::from_config(self.retry, self.clock.clone());
        strategy
            .attempt(|| async {
                self.runner
                    .run_command("parted", args)
                    .await
                    .map(|_| ())
                    .map_err(AttemptError::retryable)
            })
            .await
    }
}

#[async_trait]
impl Partitioner for PartedPartitioner {
    async fn partition(&self, device_path: &str, partitions: &[Partition]) -> Result<()> {
        if partitions.is_empty() {
            debug!(device = %device_path, "No partitions requested");
            return Ok(());
        }

        let device_size = self.get_device_size_in_bytes(device_path).await?;
        let planned = self.plan(device_path, partitions, device_size)?;

        info!(device = %device_path, partitions = planned.len(), "Creating partition table");
        self.run_parted_with_retry(&["-s", device_path, "mklabel", "gpt"])
            .await
            .with_context(|| format!("Creating GPT label on `{}'", device_path))?;

        for p in &planned {
            let start = p.start.to_string();
            let end = p.end.to_string();
            info!(
                device = %device_path,
                name = %p.name,
                fs_type = p.fs_type,
                start = p.start,
                end = p.end,
                "Creating partition"
            );
            self.run_parted_with_retry(&[
                "-s",
                device_path,
                "unit",
                "B",
                "mkpart",
                p.name.as_str(),
                p.fs_type,
                start.as_str(),
                end.as_str(),
            ])
            .await
            .with_context(|| format!("Partitioning disk `{}'", device_path))?;
        }

        if let Err(e) = self.runner.run_command("partprobe", &[device_path]).await {
            warn!(device = %device_path, error = %e, "partprobe failed, kernel may see stale table");
        }

        Ok(())
    }

    async fn get_device_size_in_bytes(&self, device_path: &str) -> Result<u64> {
        let output = self
            .runner
            .run_command("lsblk", &["--nodeps", "-nb", "-o", "SIZE", device_path])
            .await
            .with_context(|| format!("Getting size of `{}'", device_path))?;
        parse_bytes(&output.stdout)
    }
}

#[async_trait]
impl PartitionTableDriver for PartedPartitioner {
    fn set_partition_name_prefix(&self, prefix: &str) {
        if let Ok(mut current) = self.name_prefix.lock() {
            *current = prefix.to_string();
        }
    }

    async fn get_partitions(&self, device_path: &str) -> Result<(Vec<ExistingPartition>, u64)> {
        match self
            .runner
            .run_command("parted", &["-m", device_path, "unit", "B", "print"])
            .await
        {
            Ok(output) => parse_parted_output(&output.stdout),
            Err(e) if e.stderr().is_some_and(|s| s.contains(UNLABELED_DISK)) => {
                debug!(device = %device_path, "Device has no partition table");
                let size = self.get_device_size_in_bytes(device_path).await?;
                Ok((Vec::new(), size))
            }
            Err(e) => Err(PlatformError::Context {
                context: format!("Getting partitions of `{}'", device_path),
                source: Box::new(e),
            }),
        }
    }

    fn partitions_match(
        &self,
        existing: &[ExistingPartition],
        desired: &[Partition],
        device_size_in_bytes: u64,
    ) -> bool {
        if existing.len() != desired.len() {
            return false;
        }

        let Some(sizes) = planned_sizes(desired, device_size_in_bytes) else {
            return false;
        };

        existing
            .iter()
            .zip(desired)
            .zip(sizes)
            .all(|((e, d), size)| {
                let types_match =
                    e.partition_type == d.partition_type || e.partition_type == PartitionType::Empty;
                types_match && e.size_in_bytes.abs_diff(size) <= SIZE_TOLERANCE
            })
    }
}
