use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use crate::protocol::{BACKUP_EXTENSION, RECORD_SEPARATOR, STAGING_EXTENSION};

/// The address pair observed for a monitored domain.
///
/// Serialized as `"<ipv4>,<ipv6>"`. Either half is empty when the resolver
/// returned no address of that family, so a v4-only host renders as
/// `"1.1.1.1,"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpPair {
    pub ipv4: String,
    pub ipv6: String,
}

impl IpPair {
    /// Pick the first IPv4 and the first IPv6 address in the order given.
    ///
    /// The order is whatever the resolver returned; nothing is sorted or
    /// ranked, so the same answer set in a different order can select a
    /// different pair.
    pub fn first_of_each<I>(addrs: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        let mut pair = IpPair::default();
        for addr in addrs {
            match addr {
                IpAddr::V4(v4) if pair.ipv4.is_empty() => pair.ipv4 = v4.to_string(),
                IpAddr::V6(v6) if pair.ipv6.is_empty() => pair.ipv6 = v6.to_string(),
                _ => {}
            }
            if !pair.ipv4.is_empty() && !pair.ipv6.is_empty() {
                break;
            }
        }
        pair
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

impl fmt::Display for IpPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.ipv4, RECORD_SEPARATOR, self.ipv6)
    }
}

/// Paths making up one bootstrap file: the live file, its staged
/// replacement and its single backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPaths {
    pub live: PathBuf,
    pub staging: PathBuf,
    pub backup: PathBuf,
}

impl BootstrapPaths {
    pub fn new(live: impl AsRef<Path>) -> Self {
        let live = live.as_ref().to_path_buf();
        Self {
            staging: with_suffix(&live, STAGING_EXTENSION),
            backup: with_suffix(&live, BACKUP_EXTENSION),
            live,
        }
    }
}

/// Append `.suffix` to the full file name (`planet` -> `planet.tmp`,
/// `a.conf` -> `a.conf.tmp`), unlike `Path::with_extension`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
