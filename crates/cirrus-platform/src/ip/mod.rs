//! Interface addresses: reading them from the OS and checking them
//!
//! The `ip -j addr` JSON output is the single source of truth for what an
//! interface currently carries.

mod address;
mod provider;
mod validator;

pub use address::{CmdIpResolver, InterfaceAddress, IpResolver};
pub use provider::{
    parse_ip_addr_output, CmdInterfaceAddressesProvider, InterfaceAddressesProvider, SystemAddress,
};
pub use validator::{InterfaceAddressesValidator, SystemInterfaceAddressesValidator};
