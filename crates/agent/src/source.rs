//! Ethereum node access: head tracking and artifact download.
//!
//! Beacon data comes from the standard beacon REST API, execution data from
//! JSON-RPC (`eth_*` and `debug_*` namespaces).

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracoor_core::{ArtifactKind, ArtifactRecord};

pub const SLOTS_PER_EPOCH: u64 = 32;

const SSZ: &str = "application/octet-stream";

/// Latest beacon block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconHead {
    pub slot: u64,
    pub block_root: String,
    pub state_root: String,
}

impl BeaconHead {
    pub fn epoch(&self) -> u64 {
        self.slot / SLOTS_PER_EPOCH
    }
}

/// An execution block identified by hash and number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionBlock {
    pub hash: String,
    pub number: u64,
    pub extra_data: Option<String>,
}

/// A client's self-reported implementation name and version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientVersion {
    pub implementation: String,
    pub version: String,
}

impl ClientVersion {
    /// Parse a `Name/version/...` client string.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split('/');
        let implementation = parts.next()?.trim();
        if implementation.is_empty() {
            return None;
        }
        Some(Self {
            implementation: implementation.to_lowercase(),
            version: parts.next().unwrap_or_default().trim().to_string(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientVersions {
    pub beacon: Option<ClientVersion>,
    pub execution: Option<ClientVersion>,
}

/// Where the agent reads heads and artifact bytes from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn beacon_head(&self) -> AgentResult<BeaconHead>;

    /// Latest execution block, or `None` when no execution node is configured.
    async fn execution_head(&self) -> AgentResult<Option<ExecutionBlock>>;

    /// Blocks the execution node rejected.
    async fn execution_bad_blocks(&self) -> AgentResult<Vec<ExecutionBlock>> {
        Ok(Vec::new())
    }

    /// Download the bytes of the artifact `record` describes.
    async fn fetch(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<Bytes>;

    async fn client_versions(&self) -> ClientVersions {
        ClientVersions::default()
    }
}

/// [`ArtifactSource`] backed by a beacon node and an optional execution node.
#[derive(Clone)]
pub struct HttpSource {
    http: reqwest::Client,
    beacon_url: Url,
    execution_url: Option<Url>,
}

#[derive(Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Deserialize)]
struct HeaderData {
    root: String,
    header: SignedHeader,
}

#[derive(Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Deserialize)]
struct HeaderMessage {
    slot: String,
    state_root: String,
}

#[derive(Deserialize)]
struct NodeVersion {
    version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    hash: String,
    number: String,
    #[serde(default)]
    extra_data: Option<String>,
}

#[derive(Deserialize)]
struct RpcBadBlock {
    hash: String,
    block: RpcBlock,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn parse_url(kind: &str, raw: &str) -> AgentResult<Url> {
    Url::parse(raw).map_err(|e| AgentError::Node(format!("invalid {kind} URL {raw}: {e}")))
}

/// Parse a `0x`-prefixed JSON-RPC quantity.
pub fn parse_quantity(raw: &str) -> AgentResult<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| AgentError::Node(format!("invalid quantity {raw}: {e}")))
}

impl HttpSource {
    pub fn new(
        beacon_url: &str,
        execution_url: Option<&str>,
        timeout: Duration,
    ) -> AgentResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            beacon_url: parse_url("beacon node", beacon_url)?,
            execution_url: execution_url
                .map(|url| parse_url("execution node", url))
                .transpose()?,
        })
    }

    fn beacon(&self, path: &str) -> AgentResult<Url> {
        self.beacon_url
            .join(path)
            .map_err(|e| AgentError::Node(format!("failed to build beacon URL: {e}")))
    }

    async fn beacon_json<T: DeserializeOwned>(&self, path: &str) -> AgentResult<T> {
        let response = self.http.get(self.beacon(path)?).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Node(format!("GET {path} ({status}): {body}")));
        }
        Ok(response.json::<Data<T>>().await?.data)
    }

    async fn beacon_ssz(&self, path: &str) -> AgentResult<Bytes> {
        let response = self
            .http
            .get(self.beacon(path)?)
            .header(ACCEPT, SSZ)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Node(format!("GET {path} ({status}): {body}")));
        }
        Ok(response.bytes().await?)
    }

    async fn rpc(&self, method: &str, params: Value) -> AgentResult<Value> {
        let url = self
            .execution_url
            .clone()
            .ok_or_else(|| AgentError::Unsupported("no execution node configured".to_string()))?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Node(format!("{method} ({status}): {text}")));
        }
        let response: RpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(AgentError::Node(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            )));
        }
        response
            .result
            .filter(|result| !result.is_null())
            .ok_or_else(|| AgentError::Node(format!("{method} returned no result")))
    }

    async fn bad_blocks_raw(&self) -> AgentResult<Vec<Value>> {
        match self.rpc("debug_getBadBlocks", json!([])).await? {
            Value::Array(items) => Ok(items),
            other => Err(AgentError::Node(format!(
                "debug_getBadBlocks returned {other}"
            ))),
        }
    }
}

fn required<'a>(
    record: &ArtifactRecord,
    value: &'a Option<String>,
    name: &str,
) -> AgentResult<&'a str> {
    value.as_deref().ok_or_else(|| {
        AgentError::Node(format!("{name} missing on record for {}", record.location))
    })
}

#[async_trait]
impl ArtifactSource for HttpSource {
    async fn beacon_head(&self) -> AgentResult<BeaconHead> {
        let header: HeaderData = self.beacon_json("/eth/v1/beacon/headers/head").await?;
        let slot = header
            .header
            .message
            .slot
            .parse()
            .map_err(|e| AgentError::Node(format!("invalid head slot: {e}")))?;
        Ok(BeaconHead {
            slot,
            block_root: header.root,
            state_root: header.header.message.state_root,
        })
    }

    async fn execution_head(&self) -> AgentResult<Option<ExecutionBlock>> {
        if self.execution_url.is_none() {
            return Ok(None);
        }
        let block: RpcBlock =
            serde_json::from_value(self.rpc("eth_getBlockByNumber", json!(["latest", false])).await?)?;
        Ok(Some(ExecutionBlock {
            number: parse_quantity(&block.number)?,
            hash: block.hash,
            extra_data: block.extra_data,
        }))
    }

    async fn execution_bad_blocks(&self) -> AgentResult<Vec<ExecutionBlock>> {
        if self.execution_url.is_none() {
            return Ok(Vec::new());
        }
        let mut blocks = Vec::new();
        for raw in self.bad_blocks_raw().await? {
            let bad: RpcBadBlock = serde_json::from_value(raw)?;
            blocks.push(ExecutionBlock {
                number: parse_quantity(&bad.block.number)?,
                hash: bad.hash,
                extra_data: bad.block.extra_data,
            });
        }
        Ok(blocks)
    }

    async fn fetch(&self, kind: ArtifactKind, record: &ArtifactRecord) -> AgentResult<Bytes> {
        match kind {
            ArtifactKind::BeaconState => {
                let slot = record
                    .slot
                    .ok_or_else(|| AgentError::Node("slot missing on state record".to_string()))?;
                self.beacon_ssz(&format!("/eth/v2/debug/beacon/states/{slot}"))
                    .await
            }
            ArtifactKind::BeaconBlock => {
                let root = required(record, &record.block_root, "block_root")?;
                self.beacon_ssz(&format!("/eth/v2/beacon/blocks/{root}")).await
            }
            ArtifactKind::ExecutionBlockTrace => {
                let hash = required(record, &record.block_hash, "block_hash")?;
                let trace = self
                    .rpc("debug_traceBlockByHash", json!([hash, {}]))
                    .await?;
                Ok(Bytes::from(serde_json::to_vec(&trace)?))
            }
            ArtifactKind::ExecutionBadBlock => {
                let hash = required(record, &record.block_hash, "block_hash")?;
                let entry = self
                    .bad_blocks_raw()
                    .await?
                    .into_iter()
                    .find(|entry| entry.get("hash").and_then(Value::as_str) == Some(hash))
                    .ok_or_else(|| {
                        AgentError::Node(format!("bad block {hash} no longer reported"))
                    })?;
                Ok(Bytes::from(serde_json::to_vec(&entry)?))
            }
            ArtifactKind::BeaconBadBlock | ArtifactKind::BeaconBadBlob => Err(
                AgentError::Unsupported(format!("{kind} cannot be fetched from a beacon node")),
            ),
        }
    }

    async fn client_versions(&self) -> ClientVersions {
        let beacon = match self.beacon_json::<NodeVersion>("/eth/v1/node/version").await {
            Ok(v) => ClientVersion::parse(&v.version),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read beacon node version");
                None
            }
        };
        let execution = if self.execution_url.is_some() {
            match self.rpc("web3_clientVersion", json!([])).await {
                Ok(Value::String(raw)) => ClientVersion::parse(&raw),
                Ok(other) => {
                    tracing::warn!(result = %other, "Unexpected web3_clientVersion result");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read execution node version");
                    None
                }
            }
        } else {
            None
        };
        ClientVersions { beacon, execution }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_version() {
        assert_eq!(
            ClientVersion::parse("Lighthouse/v5.1.3-3058b96/x86_64-linux"),
            Some(ClientVersion {
                implementation: "lighthouse".to_string(),
                version: "v5.1.3-3058b96".to_string(),
            })
        );
        assert_eq!(
            ClientVersion::parse("teku").unwrap().version,
            String::new()
        );
        assert!(ClientVersion::parse("  ").is_none());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_epoch_from_slot() {
        let head = BeaconHead {
            slot: 65,
            block_root: "0xb".to_string(),
            state_root: "0xs".to_string(),
        };
        assert_eq!(head.epoch(), 2);
    }
}
