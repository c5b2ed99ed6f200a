//! StatusHA over the management REST endpoint.
//!
//! For every member of the role:
//! - `GET /management/coherence/cluster/services` lists the services
//! - `GET /management/coherence/cluster/services/<name>/partition` returns
//!   the partition assignment, including `HAStatus`
//!
//! A service answering 404 on the partition query is not partitioned and is
//! skipped. Any `ENDANGERED` service makes the role not HA unless the role
//! explicitly allows it.
//!
//! A role's `scalingProbe` overrides the checker's default port and request
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use gridop_api::{RoleResource, WorkloadMember};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ClusterHealth, HealthError};

const ENDANGERED: &str = "ENDANGERED";

#[derive(Debug, Deserialize)]
struct ServicesData {
    #[serde(default)]
    items: Vec<ServiceData>,
}

#[derive(Debug, Deserialize)]
struct ServiceData {
    name: String,
    #[serde(rename = "type", default)]
    service_type: String,
}

#[derive(Debug, Deserialize)]
struct PartitionData {
    #[serde(rename = "HAStatus", default)]
    ha_status: String,
    #[serde(rename = "HAStatusCode", default)]
    ha_status_code: i32,
}

/// Queries each member's management endpoint.
pub struct RestHealthChecker {
    client: reqwest::Client,
    port: u16,
}

impl RestHealthChecker {
    /// Create a checker for management endpoints on `port` (the default for
    /// roles that do not override it). Every request is bounded by `timeout`.
    pub fn new(port: u16, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, port })
    }

    fn base_url(host: &str, port: u16) -> String {
        format!("http://{host}:{port}/management/coherence/cluster")
    }

    async fn get(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, HealthError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request
            .send()
            .await
            .map_err(|source| HealthError::Request {
                url: url.to_string(),
                source,
            })
    }

    /// Check every partitioned service as seen by one member.
    async fn member_is_ha(
        &self,
        member: &WorkloadMember,
        port: u16,
        timeout: Option<Duration>,
        allowed: &[String],
    ) -> Result<bool, HealthError> {
        let base = Self::base_url(&member.host, port);

        let url = format!("{base}/services");
        let response = self.get(&url, timeout).await?;
        if !response.status().is_success() {
            return Err(HealthError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let services: ServicesData = response
            .json()
            .await
            .map_err(|source| HealthError::Request {
                url: url.clone(),
                source,
            })?;

        for service in &services.items {
            let url = format!("{base}/services/{}/partition", service.name);
            let response = self.get(&url, timeout).await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                debug!(service = %service.name, kind = %service.service_type, "service is not partitioned");
                continue;
            }
            if !response.status().is_success() {
                return Err(HealthError::Status {
                    url,
                    status: response.status().as_u16(),
                });
            }

            let partition: PartitionData =
                response
                    .json()
                    .await
                    .map_err(|source| HealthError::Request {
                        url: url.clone(),
                        source,
                    })?;

            if partition.ha_status == ENDANGERED && !allowed.contains(&service.name) {
                debug!(
                    member = %member.name,
                    service = %service.name,
                    code = partition.ha_status_code,
                    "service is endangered"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl ClusterHealth for RestHealthChecker {
    async fn is_status_ha(
        &self,
        role: &RoleResource,
        members: &[WorkloadMember],
    ) -> Result<bool, HealthError> {
        if members.is_empty() {
            return Err(HealthError::NoMembers);
        }

        let port = role.spec.scaling_probe_port().unwrap_or(self.port);
        let timeout = role.spec.scaling_probe_timeout();
        let allowed = &role.spec.allow_endangered_for_status_ha;
        for member in members {
            if !member.ready {
                return Err(HealthError::MemberNotReady {
                    member: member.name.clone(),
                });
            }

            match self.member_is_ha(member, port, timeout, allowed).await {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => {
                    warn!(role = %role.metadata.name, member = %member.name, error = %e, "StatusHA query failed");
                    return Err(e);
                }
            }
        }

        Ok(true)
    }
}
