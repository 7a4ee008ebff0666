//! Test doubles for the OS-boundary capabilities
//!
//! These record what the code under test asked the OS to do and serve
//! scripted answers, so whole reconciliation passes run without touching
//! the host.

use crate::arp::AddressBroadcaster;
use crate::error::{PlatformError, Result};
use crate::ip::InterfaceAddress;
use crate::system::{command_line, Clock, CmdRunner, CommandOutput, FileSystem};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted outcome of a fake command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeCmdResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Simulate the binary not being runnable at all
    pub spawn_error: bool,
}

impl FakeCmdResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn spawn_failure() -> Self {
        Self {
            spawn_error: true,
            exit_code: -1,
            ..Default::default()
        }
    }

    fn into_result(self, command: String) -> Result<CommandOutput> {
        if self.spawn_error {
            return Err(PlatformError::CommandSpawn {
                command,
                source: io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
            });
        }
        if self.exit_code != 0 {
            return Err(PlatformError::CommandFailed {
                command,
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            });
        }
        Ok(CommandOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: 0,
        })
    }
}

#[derive(Debug, Default)]
struct FakeCmdState {
    commands: Vec<String>,
    queued: HashMap<String, VecDeque<FakeCmdResult>>,
    sticky: HashMap<String, FakeCmdResult>,
}

/// Records every command line and answers from a script.
///
/// Commands are matched on their full rendered line (`"parted -s /dev/sdb rm 1"`).
/// Queued results are consumed once each; afterwards the sticky result for
/// the line applies; unscripted commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeCmdRunner {
    state: Mutex<FakeCmdState>,
}

impl FakeCmdRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next matching command with `result`
    pub fn add_result(&self, command: &str, result: FakeCmdResult) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(result);
    }

    /// Answer every matching command with `result` once the queue is drained
    pub fn set_result(&self, command: &str, result: FakeCmdResult) {
        self.state
            .lock()
            .unwrap()
            .sticky
            .insert(command.to_string(), result);
    }

    /// All command lines run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn ran(&self, command: &str) -> bool {
        self.commands().iter().any(|c| c == command)
    }

    pub fn clear_commands(&self) {
        self.state.lock().unwrap().commands.clear();
    }
}

#[async_trait]
impl CmdRunner for FakeCmdRunner {
    async fn run_command(&self, name: &str, args: &[&str]) -> Result<CommandOutput> {
        let command = command_line(name, args);
        let result = {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.clone());
            let queued = state
                .queued
                .get_mut(&command)
                .and_then(|queue| queue.pop_front());
            queued
                .or_else(|| state.sticky.get(&command).cloned())
                .unwrap_or_default()
        };
        result.into_result(command)
    }
}

#[derive(Debug, Default)]
struct FakeFsState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    symlinks: BTreeMap<PathBuf, PathBuf>,
    write_counts: HashMap<PathBuf, usize>,
    failing_writes: HashSet<PathBuf>,
}

impl FakeFsState {
    fn resolve(&self, path: &Path) -> PathBuf {
        let mut current = path.to_path_buf();
        for _ in 0..16 {
            match self.symlinks.get(&current) {
                Some(target) => current = target.clone(),
                None => break,
            }
        }
        current
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.dirs.contains(path)
            || self.symlinks.contains_key(path)
            || self
                .files
                .keys()
                .chain(self.dirs.iter())
                .chain(self.symlinks.keys())
                .any(|p| p != path && p.starts_with(path))
    }
}

/// In-memory filesystem
#[derive(Debug, Default)]
pub struct FakeFileSystem {
    state: Mutex<FakeFsState>,
}

impl FakeFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file without counting it as a write
    pub fn put_file(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.as_ref().to_path_buf(), contents.as_ref().to_vec());
    }

    pub fn put_dir(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .unwrap()
            .dirs
            .insert(path.as_ref().to_path_buf());
    }

    pub fn put_symlink(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) {
        self.state
            .lock()
            .unwrap()
            .symlinks
            .insert(link.as_ref().to_path_buf(), target.as_ref().to_path_buf());
    }

    /// Make writes to `path` fail with permission denied
    pub fn fail_writes_to(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .insert(path.as_ref().to_path_buf());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(path.as_ref());
        state
            .files
            .get(&resolved)
            .map(|bytes| String::from_utf8_lossy(bytes).to_string())
    }

    pub fn symlink_target(&self, link: impl AsRef<Path>) -> Option<PathBuf> {
        self.state.lock().unwrap().symlinks.get(link.as_ref()).cloned()
    }

    pub fn write_count(&self, path: impl AsRef<Path>) -> usize {
        self.state
            .lock()
            .unwrap()
            .write_counts
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    /// Register a physical NIC under a sysfs-style net directory
    pub fn add_network_device(&self, sys_class_net: impl AsRef<Path>, name: &str, mac: &str) {
        let dir = sys_class_net.as_ref().join(name);
        self.put_dir(dir.join("device"));
        self.put_file(dir.join("address"), format!("{}\n", mac));
    }

    /// Register a virtual interface (no `device` entry)
    pub fn add_virtual_device(&self, sys_class_net: impl AsRef<Path>, name: &str, mac: &str) {
        let dir = sys_class_net.as_ref().join(name);
        self.put_file(dir.join("address"), format!("{}\n", mac));
    }
}

impl FileSystem for FakeFileSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(path);
        state.files.get(&resolved).cloned().ok_or_else(|| {
            PlatformError::io(path, io::Error::new(io::ErrorKind::NotFound, "file not found"))
        })
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_writes.contains(path) {
            return Err(PlatformError::io(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            ));
        }
        let resolved = state.resolve(path);
        state.files.insert(resolved, contents.to_vec());
        *state.write_counts.entry(path.to_path_buf()).or_default() += 1;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().exists(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().unwrap();
        if !state.exists(path) {
            return Err(PlatformError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "directory not found"),
            ));
        }
        let children: BTreeSet<PathBuf> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .chain(state.symlinks.keys())
            .filter_map(|p| p.strip_prefix(path).ok())
            .filter_map(|rest| rest.components().next())
            .map(|first| path.join(first))
            .collect();
        Ok(children.into_iter().collect())
    }

    fn read_and_follow_link(&self, path: &Path) -> Result<PathBuf> {
        let state = self.state.lock().unwrap();
        let resolved = state.resolve(path);
        if !state.exists(&resolved) {
            return Err(PlatformError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "file not found"),
            ));
        }
        Ok(resolved)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.files.remove(link);
        state.symlinks.insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        let contents = self.read_file(from)?;
        self.write_file(to, &contents)
    }
}

/// Clock that records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Broadcaster that resolves and records addresses instead of sending ARP
#[derive(Debug, Default)]
pub struct FakeAddressBroadcaster {
    broadcasts: Mutex<Vec<(String, String)>>,
    error: Mutex<Option<String>>,
}

impl FakeAddressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every broadcast fail with the given message
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.error.lock().unwrap() = Some(message.into());
    }

    /// `(interface, ip)` pairs broadcast so far
    pub fn broadcasts(&self) -> Vec<(String, String)> {
        self.broadcasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressBroadcaster for FakeAddressBroadcaster {
    async fn broadcast_mac_addresses(&self, addresses: Vec<InterfaceAddress>) -> Result<()> {
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(PlatformError::Broadcast(message));
        }
        for address in addresses {
            let ip = address.resolve().await?;
            self.broadcasts
                .lock()
                .unwrap()
                .push((address.interface_name().to_string(), ip));
        }
        Ok(())
    }
}

/// Render `ip -j addr show` output for the given `(interface, address)` pairs
pub fn ip_addr_json(addresses: &[(&str, &str)]) -> String {
    let mut by_interface: BTreeMap<&str, Vec<serde_json::Value>> = BTreeMap::new();
    for &(interface, ip) in addresses {
        let family = if ip.contains(':') { "inet6" } else { "inet" };
        let scope = if ip.starts_with("127.") || ip == "::1" {
            "host"
        } else {
            "global"
        };
        let prefixlen = if family == "inet" { 24 } else { 64 };
        by_interface.entry(interface).or_default().push(serde_json::json!({
            "family": family,
            "local": ip,
            "prefixlen": prefixlen,
            "scope": scope,
        }));
    }
    let links: Vec<serde_json::Value> = by_interface
        .into_iter()
        .enumerate()
        .map(|(i, (interface, addr_info))| {
            serde_json::json!({
                "ifindex": i + 1,
                "ifname": interface,
                "addr_info": addr_info,
            })
        })
        .collect();
    serde_json::Value::Array(links).to_string()
}
