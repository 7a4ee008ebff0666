//! Cirrus OS reconciliation core
//!
//! Brings a VM's ephemeral disk and network configuration in line with the
//! desired settings, driving the standard Linux tools (`parted`, `wipefs`,
//! `ifup`/`ifdown`, `resolvconf`, `arping`, `ip`) through explicit
//! capabilities so every pass can be exercised against fakes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 cirrus-agent                  │
//! └───────────────┬─────────────────┬─────────────┘
//!                 │                 │
//!                 ▼                 ▼
//! ┌───────────────────────┐ ┌───────────────────────┐
//! │ EphemeralDevice-      │ │ UbuntuNetManager      │
//! │ Partitioner           │ │  detect ─ build ─ diff│
//! │  identity ─ match ─   │ │  stop ─ write ─ start │
//! │  wipe ─ recreate      │ │  validate ─ broadcast │
//! └──────────┬────────────┘ └──────────┬────────────┘
//!            │   RetryStrategy         │
//!            ▼                         ▼
//! ┌──────────────────────────────────────────────┐
//! │     CmdRunner  │  FileSystem  │  Clock        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use cirrus_platform::{NetManager, UbuntuNetManager};
//!
//! let manager = UbuntuNetManager::new(runner, fs, clock, NetPaths::default(), ArpingConfig::default());
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! manager.setup_networking(&settings.networks, Some(tx)).await?;
//! rx.await??;
//! ```

pub mod arp;
pub mod disk;
pub mod error;
pub mod fakes;
pub mod ip;
pub mod net;
pub mod retry;
pub mod system;

pub use arp::{AddressBroadcaster, ArpingBroadcaster, ArpingConfig};
pub use disk::{
    EphemeralDevicePartitioner, ExistingPartition, PartedPartitioner, PartitionTableDriver,
    Partitioner,
};
pub use error::{PlatformError, Result, ResultExt};
pub use ip::{InterfaceAddress, IpResolver};
pub use net::{BroadcastDone, ConvergencePhase, NetManager, NetPaths, NetworkConfig, UbuntuNetManager};
pub use retry::{AttemptError, AttemptResult, RetryConfig, RetryStrategy};
pub use system::{
    Clock, CmdRunner, CommandOutput, ConvergeOpts, ExecCmdRunner, FileSystem, OsFileSystem,
    TokioClock,
};
