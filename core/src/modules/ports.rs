use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};
use serde::Serialize;
use tokio::net::TcpStream;

use crate::modules::runner::{locate, run_tool};

pub const TOP_PORTS: &[u16] = &[80, 443, 21, 22, 25, 53, 110, 143, 3306, 5432, 8000, 8080, 8443];
pub const NMAP_TIMEOUT: Duration = Duration::from_secs(60);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Serialized as `{"nmap": {...}}`, `{"tcp": {port: open}}` or `{"error": msg}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortReport {
    Nmap { ok: bool, output: String },
    Tcp(BTreeMap<u16, bool>),
    Error(String),
}

impl PortReport {
    pub fn open_ports(&self) -> Vec<u16> {
        match self {
            PortReport::Tcp(map) => map.iter().filter(|(_, open)| **open).map(|(p, _)| *p).collect(),
            PortReport::Nmap { output, .. } => parse_nmap_open(output),
            PortReport::Error(_) => Vec::new(),
        }
    }
}

/// `80/tcp open http` style lines.
fn parse_nmap_open(output: &str) -> Vec<u16> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let port = cols.next()?.split('/').next()?.parse::<u16>().ok()?;
            (cols.next()? == "open").then_some(port)
        })
        .collect()
}

pub struct PortScanner {
    ports: Vec<u16>,
    nmap_timeout: Duration,
    connect_timeout: Duration,
    use_nmap: bool,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self {
            ports: TOP_PORTS.to_vec(),
            nmap_timeout: NMAP_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            use_nmap: true,
        }
    }
}

impl PortScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn without_nmap(mut self) -> Self {
        self.use_nmap = false;
        self
    }

    /// nmap when available, concurrent TCP connects otherwise.
    pub async fn scan(&self, host: &str) -> PortReport {
        if host.is_empty() {
            return PortReport::Error("no host to scan".to_string());
        }
        if self.use_nmap {
            match self.nmap(host).await {
                Ok(output) => return PortReport::Nmap { ok: true, output },
                Err(e) => debug!("nmap unavailable, falling back to tcp connect: {}", e),
            }
        }
        info!("tcp connect scan of {} ({} ports)", host, self.ports.len());
        PortReport::Tcp(self.tcp_scan(host).await)
    }

    async fn nmap(&self, host: &str) -> Result<String, crate::errors::ScanError> {
        let nmap = locate("nmap")?;
        let list = self.ports.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
        let args = vec!["-Pn".to_string(), "-p".to_string(), list, host.to_string()];
        let out = run_tool(&nmap, &args, self.nmap_timeout).await?;
        if !out.success {
            return Err(crate::errors::ScanError::ToolUnavailable(format!(
                "nmap exited with {:?}: {}",
                out.code,
                out.stderr.trim()
            )));
        }
        Ok(format!("{}{}", out.stdout, out.stderr))
    }

    pub async fn tcp_scan(&self, host: &str) -> BTreeMap<u16, bool> {
        let checks = self.ports.iter().map(|&port| async move {
            let open = matches!(
                tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await,
                Ok(Ok(_))
            );
            (port, open)
        });
        join_all(checks).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_scan_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let tmp = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        let scanner = PortScanner::new().without_nmap().with_ports(vec![open, closed]);
        let report = scanner.scan("127.0.0.1").await;
        match &report {
            PortReport::Tcp(map) => {
                assert_eq!(map.get(&open), Some(&true));
                assert_eq!(map.get(&closed), Some(&false));
            }
            other => panic!("unexpected report {:?}", other),
        }
        assert_eq!(report.open_ports(), vec![open]);
    }

    #[test]
    fn test_parse_nmap_open_lines() {
        let out = "PORT     STATE  SERVICE\n22/tcp   open   ssh\n80/tcp   closed http\n443/tcp  open   https\n";
        assert_eq!(parse_nmap_open(out), vec![22, 443]);
    }

    #[test]
    fn test_report_serialization_shape() {
        let mut map = BTreeMap::new();
        map.insert(80, true);
        let json = serde_json::to_value(PortReport::Tcp(map)).unwrap();
        assert_eq!(json["tcp"]["80"], true);

        let json = serde_json::to_value(PortReport::Error("boom".into())).unwrap();
        assert_eq!(json["error"], "boom");
    }
}
