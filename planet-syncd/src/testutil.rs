//! Fixtures shared by the unit tests: a scripted upstream served over real
//! HTTP, and a resolver with canned answers.

use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use crate::config::Config;
use crate::resolver::Resolve;

struct MockState {
    ips: Vec<u8>,
    planet: Vec<u8>,
    ips_status: u16,
    planet_status: u16,
    ips_hits: usize,
    planet_hits: usize,
    publish_after: Option<(usize, Vec<u8>)>,
}

/// Upstream authority serving `/ips` and `/planet`
#[derive(Clone)]
pub struct MockUpstream {
    inner: Arc<Mutex<MockState>>,
}

impl MockUpstream {
    pub fn new(ips: &[u8], planet: &[u8]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                ips: ips.to_vec(),
                planet: planet.to_vec(),
                ips_status: 200,
                planet_status: 200,
                ips_hits: 0,
                planet_hits: 0,
                publish_after: None,
            })),
        }
    }

    pub fn set_ips_status(&self, status: u16) {
        self.inner.lock().unwrap().ips_status = status;
    }

    pub fn set_planet_status(&self, status: u16) {
        self.inner.lock().unwrap().planet_status = status;
    }

    /// Serve the current record for `hits` more requests, then `ips`
    pub fn publish_after(&self, hits: usize, ips: &[u8]) {
        let mut state = self.inner.lock().unwrap();
        let at = state.ips_hits + hits;
        state.publish_after = Some((at, ips.to_vec()));
    }

    pub fn ips_hits(&self) -> usize {
        self.inner.lock().unwrap().ips_hits
    }

    pub fn planet_hits(&self) -> usize {
        self.inner.lock().unwrap().planet_hits
    }

    /// Bind to an ephemeral local port and serve in the background
    pub async fn serve(&self) -> SocketAddr {
        let app = Router::new()
            .route("/ips", get(serve_ips))
            .route("/planet", get(serve_planet))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

async fn serve_ips(State(mock): State<MockUpstream>) -> (StatusCode, Vec<u8>) {
    let mut state = mock.inner.lock().unwrap();
    state.ips_hits += 1;
    if let Some((at, ips)) = state.publish_after.clone() {
        if state.ips_hits > at {
            state.ips = ips;
            state.publish_after = None;
        }
    }
    let status = StatusCode::from_u16(state.ips_status).unwrap();
    (status, state.ips.clone())
}

async fn serve_planet(State(mock): State<MockUpstream>) -> (StatusCode, Vec<u8>) {
    let mut state = mock.inner.lock().unwrap();
    state.planet_hits += 1;
    let status = StatusCode::from_u16(state.planet_status).unwrap();
    (status, state.planet.clone())
}

/// Resolver returning a fixed answer
pub struct StaticResolver {
    answer: Option<Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new(addrs: Vec<IpAddr>) -> Self {
        Self { answer: Some(addrs) }
    }

    pub fn failing() -> Self {
        Self { answer: None }
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn lookup(&self, domain: &str) -> io::Result<Vec<IpAddr>> {
        self.answer.clone().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such host: {domain}"))
        })
    }
}

/// In-memory log sink for asserting on what a code path logged
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Subscriber writing plain formatted events into this sink
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let sink = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    pub fn lines_containing(&self, needle: &str) -> usize {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Config pointing every path into `dir` and every URL at `addr`
pub fn test_config(dir: &Path, addr: SocketAddr) -> Config {
    let mut config = Config::parse(&format!(
        r#"
        [log]
        max_lines = 100
        buffer_lines = 10

        [upstream]
        domain = "example.com"
        ips_url = "http://{addr}/ips"
        planet_url = "http://{addr}/planet"
        request_timeout_secs = 5
        poll_interval_secs = 1

        [state]
        check_interval_secs = 3600

        [overlay]
        service_name = "zerotier-one"
        planet_path = "planet"
        "#
    ))
    .unwrap();
    config.resolve_relative_paths(dir);
    std::fs::create_dir_all(dir.join("state")).unwrap();
    config
}
