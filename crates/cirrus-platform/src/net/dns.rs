use crate::error::{PlatformError, Result, ResultExt};
use crate::system::FileSystem;
use std::path::PathBuf;
use std::sync::Arc;

/// Checks the resolver configuration after convergence
pub trait DnsValidator: Send + Sync {
    fn validate(&self, dns_servers: &[String]) -> Result<()>;
}

/// Requires at least one desired server to appear in `resolv.conf`
pub struct ResolvConfDnsValidator {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl ResolvConfDnsValidator {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }
}

impl DnsValidator for ResolvConfDnsValidator {
    fn validate(&self, dns_servers: &[String]) -> Result<()> {
        if dns_servers.is_empty() {
            return Ok(());
        }

        let contents = self
            .fs
            .read_file_string(&self.path)
            .with_context(|| format!("Reading {}", self.path.display()))?;

        if dns_servers.iter().any(|server| contents.contains(server.as_str())) {
            Ok(())
        } else {
            Err(PlatformError::DnsNotConfigured(dns_servers.to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFileSystem;

    fn validator(contents: Option<&str>) -> ResolvConfDnsValidator {
        let fs = Arc::new(FakeFileSystem::new());
        if let Some(contents) = contents {
            fs.put_file("/etc/resolv.conf", contents);
        }
        ResolvConfDnsValidator::new(fs, "/etc/resolv.conf")
    }

    #[test]
    fn test_empty_dns_always_passes() {
        validator(None).validate(&[]).unwrap();
    }

    #[test]
    fn test_any_desired_server_suffices() {
        validator(Some("nameserver 1.1.1.1\n"))
            .validate(&["8.8.8.8".to_string(), "1.1.1.1".to_string()])
            .unwrap();
    }

    #[test]
    fn test_missing_servers() {
        let err = validator(Some("nameserver 9.9.9.9\n"))
            .validate(&["8.8.8.8".to_string()])
            .unwrap_err();
        assert!(matches!(err, PlatformError::DnsNotConfigured(servers) if servers == ["8.8.8.8"]));

        assert!(validator(None).validate(&["8.8.8.8".to_string()]).is_err());
    }
}
