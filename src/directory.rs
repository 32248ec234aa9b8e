//! Client for the remote host-location directory.
//!
//! The directory maps `(switch, MAC)` to the port the host was last seen on.
//! It is the only copy of that mapping; nothing here caches answers, so a host
//! that moves is picked up on the very next lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::mac::MacAddress;
use crate::ofp_controller::DatapathId;
use crate::openflow0x04::OfpPort;

const SET_PORT_ENDPOINT: &str = "setPort";
const GET_PORT_ENDPOINT: &str = "getPort";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("refusing to learn group address {0}")]
    GroupAddress(MacAddress),

    #[error("directory did not answer within {0:?}")]
    Timeout(Duration),

    #[error("directory transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("directory answered {0}")]
    Status(StatusCode),

    #[error("malformed directory response: {0}")]
    Malformed(String),

    #[error("invalid directory URL: {0}")]
    InvalidUrl(String),
}

/// Where hosts live.
///
/// `resolve` folds every failure into `None`: callers cannot tell a host that
/// was never seen from a directory that is down, and both end in a flood.
#[async_trait]
pub trait HostLocationDirectory: Send + Sync {
    /// Store `port` as the attachment point of `mac` on `switch`. Idempotent.
    async fn record(&self, switch: DatapathId, mac: MacAddress, port: u32) -> Result<(), DirectoryError>;

    /// Current attachment point of `mac` on `switch`, if the directory knows it.
    async fn resolve(&self, switch: DatapathId, mac: MacAddress) -> Option<u32>;
}

#[derive(Debug, Deserialize)]
struct GetPortReply {
    #[serde(rename = "hostsDatabase")]
    hosts_database: HostEntry,
}

#[derive(Debug, Deserialize)]
struct HostEntry {
    inport: String,
}

/// `HostLocationDirectory` over the directory's HTTP interface.
///
/// Every request, body included, must finish within `timeout`.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpDirectory {
    pub fn new(mut base: Url, timeout: Duration) -> Result<HttpDirectory, DirectoryError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().build()?;
        Ok(HttpDirectory {
            client,
            base,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn fetch(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Vec<u8>, DirectoryError> {
        let url = self
            .base
            .join(endpoint)
            .map_err(|e| DirectoryError::InvalidUrl(e.to_string()))?;
        let request = async {
            let response = self.client.get(url).query(query).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(DirectoryError::Status(status));
            }
            Ok(response.bytes().await?.to_vec())
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| DirectoryError::Timeout(self.timeout))?
    }

    /// Like `resolve`, but keeps the reason a lookup came back empty.
    pub async fn lookup(&self, switch: DatapathId, mac: MacAddress) -> Result<u32, DirectoryError> {
        let body = self
            .fetch(
                GET_PORT_ENDPOINT,
                &[("dpid", switch.0.to_string()), ("mac", mac.to_u64().to_string())],
            )
            .await?;
        parse_get_port(&body)
    }
}

fn parse_get_port(body: &[u8]) -> Result<u32, DirectoryError> {
    let reply: GetPortReply =
        serde_json::from_slice(body).map_err(|e| DirectoryError::Malformed(e.to_string()))?;
    let inport = reply.hosts_database.inport;
    let port = inport
        .trim()
        .parse::<u32>()
        .map_err(|_| DirectoryError::Malformed(format!("inport {:?}", inport)))?;
    if port > OfpPort::OFPPMax as u32 {
        return Err(DirectoryError::Malformed(format!("reserved port {:#x}", port)));
    }
    Ok(port)
}

#[async_trait]
impl HostLocationDirectory for HttpDirectory {
    async fn record(&self, switch: DatapathId, mac: MacAddress, port: u32) -> Result<(), DirectoryError> {
        if mac.is_multicast() {
            return Err(DirectoryError::GroupAddress(mac));
        }
        self.fetch(
            SET_PORT_ENDPOINT,
            &[
                ("dpid", switch.0.to_string()),
                ("mac", mac.to_u64().to_string()),
                ("inport", port.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn resolve(&self, switch: DatapathId, mac: MacAddress) -> Option<u32> {
        match self.lookup(switch, mac).await {
            Ok(port) => Some(port),
            Err(DirectoryError::Status(StatusCode::NOT_FOUND)) => {
                debug!(dpid = %switch, %mac, "host not in directory");
                None
            }
            Err(e) => {
                warn!(dpid = %switch, %mac, error = %e, "directory lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_reply() {
        let body = br#"{"hostsDatabase": {"inport": "3"}}"#;
        assert_eq!(parse_get_port(body).unwrap(), 3);
    }

    #[test]
    fn rejects_malformed_replies() {
        for body in [
            &br#"{"hostsDatabase": {}}"#[..],
            br#"{"inport": "3"}"#,
            br#"{"hostsDatabase": {"inport": "-1"}}"#,
            br#"{"hostsDatabase": {"inport": "4294967293"}}"#,
            b"not json",
        ] {
            assert!(
                matches!(parse_get_port(body), Err(DirectoryError::Malformed(_))),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let url: Url = "http://directory.local:6666/api".parse().unwrap();
        let dir = HttpDirectory::new(url, Duration::from_millis(10)).unwrap();
        assert_eq!(dir.base_url().as_str(), "http://directory.local:6666/api/");
        assert_eq!(
            dir.base_url().join(GET_PORT_ENDPOINT).unwrap().as_str(),
            "http://directory.local:6666/api/getPort"
        );
    }

    #[tokio::test]
    async fn group_addresses_are_never_sent() {
        // Nothing listens on port 9; reaching the network would be a transport error.
        let url: Url = "http://127.0.0.1:9/".parse().unwrap();
        let dir = HttpDirectory::new(url, Duration::from_millis(10)).unwrap();
        let err = dir
            .record(DatapathId(1), MacAddress::BROADCAST, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::GroupAddress(_)));
    }
}
