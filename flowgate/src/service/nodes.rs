//! Node management

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Node;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(rename = "serverIp", default)]
    pub server_ip: String,
    #[serde(rename = "portSta", default)]
    pub port_sta: i32,
    #[serde(rename = "portEnd", default)]
    pub port_end: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNodeRequest {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(rename = "serverIp", default)]
    pub server_ip: Option<String>,
    #[serde(rename = "portSta", default)]
    pub port_sta: Option<i32>,
    #[serde(rename = "portEnd", default)]
    pub port_end: Option<i32>,
}

/// Node row plus live session state
#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub id: i64,
    pub name: String,
    pub ip: String,
    pub online: bool,
    pub version: String,
}

#[derive(Clone)]
pub struct NodeService {
    state: AppState,
}

impl NodeService {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Create a node; the bearer secret is minted here and never chosen
    /// by the caller.
    pub async fn create(&self, req: CreateNodeRequest) -> Result<i64> {
        if req.port_end < req.port_sta {
            return Err(Error::bad_request("端口范围无效"));
        }

        let record = crate::repository::NewNode {
            name: req.name,
            secret: Uuid::new_v4().simple().to_string(),
            ip: req.ip,
            server_ip: req.server_ip,
            version: String::new(),
            port_sta: req.port_sta,
            port_end: req.port_end,
            http: 0,
            tls: 0,
            socks: 0,
        };
        self.state.nodes().create(&record).await
    }

    pub async fn list(&self) -> Result<Vec<Node>> {
        self.state.nodes().find_all().await
    }

    pub async fn update(&self, req: UpdateNodeRequest) -> Result<()> {
        let mut node = self
            .state
            .nodes()
            .find_by_id(req.id)
            .await?
            .ok_or_else(|| Error::not_found("节点不存在"))?;

        if let Some(secret) = req.secret {
            if secret != node.secret {
                // the derived key is stale the moment the secret rotates
                self.state.sessions.ciphers().invalidate(&node.secret);
                node.secret = secret;
            }
        }
        if let Some(name) = req.name {
            node.name = name;
        }
        if let Some(ip) = req.ip {
            node.ip = ip;
        }
        if let Some(server_ip) = req.server_ip {
            node.server_ip = server_ip;
        }
        if let Some(port_sta) = req.port_sta {
            node.port_sta = port_sta;
        }
        if let Some(port_end) = req.port_end {
            node.port_end = port_end;
        }
        if node.port_end < node.port_sta {
            return Err(Error::bad_request("端口范围无效"));
        }

        self.state.nodes().update(&node).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let node = self
            .state
            .nodes()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("节点不存在"))?;

        self.state.sessions.ciphers().invalidate(&node.secret);
        self.state.nodes().soft_delete(id).await
    }

    /// Render the agent install one-liner for a node
    pub async fn install_command(&self, id: i64) -> Result<String> {
        let node = self
            .state
            .nodes()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::not_found("节点不存在"))?;

        let panel_addr = self.state.configs().value_or("ip", "").await?;

        Ok(format!(
            "curl -fsSL https://get.flowgate.dev/agent.sh | bash -s -- --id={} --secret={} --panel={}",
            node.id, node.secret, panel_addr
        ))
    }

    /// Online/offline per node, straight from the session registry
    pub async fn check_status(&self, id: Option<i64>) -> Result<Vec<NodeStatus>> {
        let nodes = match id {
            Some(id) => {
                let node = self
                    .state
                    .nodes()
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| Error::not_found("节点不存在"))?;
                vec![node]
            }
            None => self.state.nodes().find_all().await?,
        };

        Ok(nodes
            .into_iter()
            .map(|node| NodeStatus {
                online: self.state.sessions.is_connected(node.id),
                id: node.id,
                name: node.name,
                ip: node.ip,
                version: node.version,
            })
            .collect())
    }
}
