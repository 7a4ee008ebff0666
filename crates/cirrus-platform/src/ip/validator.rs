use super::address::InterfaceAddress;
use super::provider::{InterfaceAddressesProvider, SystemAddress};
use crate::error::{PlatformError, Result, ResultExt};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Checks that interfaces actually carry the addresses we configured
#[async_trait]
pub trait InterfaceAddressesValidator: Send + Sync {
    async fn validate(&self, desired: &[InterfaceAddress]) -> Result<()>;
}

pub struct SystemInterfaceAddressesValidator {
    provider: Arc<dyn InterfaceAddressesProvider>,
}

impl SystemInterfaceAddressesValidator {
    pub fn new(provider: Arc<dyn InterfaceAddressesProvider>) -> Self {
        Self { provider }
    }
}

fn same_ip(a: &str, b: &str) -> bool {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[async_trait]
impl InterfaceAddressesValidator for SystemInterfaceAddressesValidator {
    async fn validate(&self, desired: &[InterfaceAddress]) -> Result<()> {
        if desired.is_empty() {
            return Ok(());
        }

        let system = self
            .provider
            .get()
            .await
            .context("Getting network interface addresses")?;

        for address in desired {
            let interface = address.interface_name();
            let actual: Vec<&SystemAddress> =
                system.iter().filter(|a| a.interface == interface).collect();
            if actual.is_empty() {
                return Err(PlatformError::UnknownInterface(interface.to_string()));
            }

            let expected = address.resolve().await?;
            if !actual.iter().any(|a| same_ip(&a.ip, &expected)) {
                return Err(PlatformError::AddressMismatch {
                    interface: interface.to_string(),
                    expected,
                    actual: actual
                        .iter()
                        .map(|a| a.ip.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
            debug!(interface = %interface, ip = %expected, "Interface address validated");
        }

        Ok(())
    }
}
