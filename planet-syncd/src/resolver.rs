//! Address lookups: the monitored domain via DNS, the server record via the
//! upstream HTTP endpoint, and the last-seen values on disk.

use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use shared::types::IpPair;
use crate::config::Config;
use crate::error::{Result, SyncError};

#[async_trait]
pub trait Resolve: Send + Sync {
    /// All addresses for `domain`, in the order the resolver returned them
    async fn lookup(&self, domain: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's `getaddrinfo`
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, domain: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((domain, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Current `"ipv4,ipv6"` record for `domain`
pub async fn current_ips(resolver: &dyn Resolve, domain: &str) -> Result<IpPair> {
    let addrs = resolver
        .lookup(domain)
        .await
        .map_err(|source| SyncError::Dns {
            domain: domain.to_string(),
            source,
        })?;

    let pair = IpPair::first_of_each(addrs);
    if pair.is_empty() {
        return Err(SyncError::Dns {
            domain: domain.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        });
    }
    Ok(pair)
}

/// Read a persisted record as raw bytes. A missing file is an empty record,
/// so "never recorded" and "recorded as empty" compare the same.
pub async fn local_ips(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SyncError::io("reading", path, e)),
    }
}

/// HTTP side of the upstream authority
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    ips_url: String,
    planet_url: String,
}

impl Upstream {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("planet-syncd/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            ips_url: config.upstream.ips_url.clone(),
            planet_url: config.upstream.planet_url.clone(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn planet_url(&self) -> &str {
        &self.planet_url
    }

    /// The record the server currently publishes. Opaque: kept byte for byte.
    pub async fn server_ips(&self) -> Result<Vec<u8>> {
        let url = self.ips_url.as_str();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::BadStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::transport(url, e))?;
        Ok(body.to_vec())
    }

    /// Poll until the published server record differs from the one stored
    /// at `local_path`, and return the new value.
    ///
    /// There is no retry limit: this waits for as long as upstream takes to
    /// republish. `cancel` is honoured during requests and between polls.
    pub async fn wait_for_server_update(
        &self,
        local_path: &Path,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        loop {
            let server = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                server = self.server_ips() => server?,
            };

            let local = local_ips(local_path).await?;
            if server != local {
                return Ok(server);
            }

            tracing::info!("Upstream has not republished yet, checking again in {:?}", interval);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::time::Instant;
    use crate::testutil::{test_config, MockUpstream, StaticResolver};

    #[tokio::test]
    async fn test_current_ips_takes_first_of_each_family() {
        let resolver = StaticResolver::new(vec![
            IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0, 0, 0, 0, 0, 0x1111)),
            IpAddr::V4(Ipv4Addr::new(1, 0, 0, 1)),
        ]);

        let pair = current_ips(&resolver, "example.com").await.unwrap();
        assert_eq!(pair.to_string(), "1.1.1.1,2606:4700::1111");
    }

    #[tokio::test]
    async fn test_current_ips_reports_dns_failure() {
        let err = current_ips(&StaticResolver::failing(), "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Dns { .. }));

        let err = current_ips(&StaticResolver::new(vec![]), "example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Dns { .. }));
    }

    #[tokio::test]
    async fn test_system_resolver_handles_literal_address() {
        let pair = current_ips(&SystemResolver, "127.0.0.1").await.unwrap();
        assert_eq!(pair.to_string(), "127.0.0.1,");
    }

    #[tokio::test]
    async fn test_local_ips_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let record = local_ips(&dir.path().join("never-written.txt")).await.unwrap();
        assert!(record.is_empty());
    }

    #[tokio::test]
    async fn test_local_ips_returns_raw_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip.txt");
        std::fs::write(&path, "1.1.1.1,\n").unwrap();

        // Untrimmed: compared byte for byte
        assert_eq!(local_ips(&path).await.unwrap(), b"1.1.1.1,\n");
    }

    #[tokio::test]
    async fn test_local_ips_keeps_invalid_utf8_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, [0xff]).unwrap();
        std::fs::write(&b, [0xfe]).unwrap();

        let a = local_ips(&a).await.unwrap();
        let b = local_ips(&b).await.unwrap();
        assert_eq!(a, vec![0xff]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_server_ips_rejects_bad_status() {
        let mock = MockUpstream::new(b"10.0.0.1,", b"planet");
        mock.set_ips_status(503);
        let addr = mock.serve().await;
        let dir = tempfile::tempdir().unwrap();
        let upstream = Upstream::new(&test_config(dir.path(), addr)).unwrap();

        let err = upstream.server_ips().await.unwrap_err();
        assert!(matches!(err, SyncError::BadStatus { status, .. } if status.as_u16() == 503));
    }

    #[tokio::test]
    async fn test_wait_returns_once_upstream_republishes() {
        let mock = MockUpstream::new(b"10.0.0.1,", b"planet");
        mock.publish_after(3, b"10.0.0.2,");
        let addr = mock.serve().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), addr);
        std::fs::write(&config.state.server_ip_record_path, "10.0.0.1,").unwrap();
        let upstream = Upstream::new(&config).unwrap();

        let server = upstream
            .wait_for_server_update(
                &config.state.server_ip_record_path,
                Duration::from_millis(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(server, b"10.0.0.2,");
        assert_eq!(mock.ips_hits(), 4);
    }

    #[tokio::test]
    async fn test_wait_compares_raw_bytes() {
        // Both records decode to U+FFFD; only the raw bytes tell them apart
        let mock = MockUpstream::new(&[0xfe, b','], b"planet");
        let addr = mock.serve().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), addr);
        std::fs::write(&config.state.server_ip_record_path, [0xff, b',']).unwrap();
        let upstream = Upstream::new(&config).unwrap();

        let server = upstream
            .wait_for_server_update(
                &config.state.server_ip_record_path,
                Duration::from_secs(3600),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(server, vec![0xfe, b',']);
        assert_eq!(mock.ips_hits(), 1);
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let mock = MockUpstream::new(b"10.0.0.1,", b"planet");
        let addr = mock.serve().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), addr);
        std::fs::write(&config.state.server_ip_record_path, "10.0.0.1,").unwrap();
        let upstream = Upstream::new(&config).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = upstream
            .wait_for_server_update(
                &config.state.server_ip_record_path,
                Duration::from_secs(3600),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
