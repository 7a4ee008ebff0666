use crate::error::{Result, ResultExt};
use crate::system::CmdRunner;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Kernel-level IPv6 switches
#[async_trait]
pub trait KernelIpv6: Send + Sync {
    async fn enable(&self) -> Result<()>;
}

const IPV6_SYSCTLS: &[&str] = &[
    "net.ipv6.conf.all.disable_ipv6=0",
    "net.ipv6.conf.default.disable_ipv6=0",
    "net.ipv6.conf.all.accept_ra=1",
    "net.ipv6.conf.default.accept_ra=1",
];

pub struct SysctlKernelIpv6 {
    runner: Arc<dyn CmdRunner>,
}

impl SysctlKernelIpv6 {
    pub fn new(runner: Arc<dyn CmdRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl KernelIpv6 for SysctlKernelIpv6 {
    async fn enable(&self) -> Result<()> {
        for &setting in IPV6_SYSCTLS {
            self.runner
                .run_command("sysctl", &["-w", setting])
                .await
                .with_context(|| format!("Setting {}", setting))?;
        }
        info!("Enabled IPv6 in kernel");
        Ok(())
    }
}
