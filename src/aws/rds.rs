// pst/src/aws/rds.rs
use async_trait::async_trait;
use aws_sdk_rds as rds;
use indexmap::IndexMap;
use rds::config::Region;
use rds::error::DisplayErrorContext;
use std::fmt;
use tracing::{debug, warn};

use super::Session;
use crate::config::RoleInfo;
use crate::errors::{Result, SyncError};

const PRIMARY_SUFFIX: &str = "-postgresql";
const READ_REPLICA_SUFFIX: &str = "-read-replica";
const DATA_REPLICA_SUFFIX: &str = "-data-replica";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Primary,
    Replica,
    DataReplica,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Primary => "primary",
            RoleKind::Replica => "replica",
            RoleKind::DataReplica => "datareplica",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a replica, judged only by its identifier suffix. Unknown suffixes
/// are not part of the topology.
pub fn classify_replica(identifier: &str) -> Option<RoleKind> {
    if identifier.ends_with(READ_REPLICA_SUFFIX) {
        Some(RoleKind::Replica)
    } else if identifier.ends_with(DATA_REPLICA_SUFFIX) {
        Some(RoleKind::DataReplica)
    } else {
        None
    }
}

/// `{environment_name}-postgresql`
pub fn primary_instance_name(environment_name: &str) -> String {
    format!("{}{}", environment_name, PRIMARY_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEndpoint {
    pub instance_name: String,
    pub endpoint: String,
}

/// Resolved primary plus at most one instance of each replica kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub primary: InstanceEndpoint,
    pub replica: Option<InstanceEndpoint>,
    pub datareplica: Option<InstanceEndpoint>,
}

impl Topology {
    pub fn new(primary: InstanceEndpoint) -> Self {
        Self {
            primary,
            replica: None,
            datareplica: None,
        }
    }

    /// Slots `instance` by its suffix. Returns false when the suffix is not recognised.
    pub fn add_replica(&mut self, instance: InstanceEndpoint) -> bool {
        let slot = match classify_replica(&instance.instance_name) {
            Some(RoleKind::Replica) => &mut self.replica,
            Some(RoleKind::DataReplica) => &mut self.datareplica,
            _ => return false,
        };
        if let Some(previous) = slot.replace(instance) {
            debug!(instance = %previous.instance_name, "replaced by a later replica of the same kind");
        }
        true
    }

    /// Roles in `primary`, `replica`, `datareplica` order.
    pub fn roles(&self) -> Vec<(RoleKind, &InstanceEndpoint)> {
        let mut roles = vec![(RoleKind::Primary, &self.primary)];
        if let Some(replica) = &self.replica {
            roles.push((RoleKind::Replica, replica));
        }
        if let Some(datareplica) = &self.datareplica {
            roles.push((RoleKind::DataReplica, datareplica));
        }
        roles
    }

    /// The descriptor `roles` subtree for this topology.
    pub fn to_roles(&self) -> IndexMap<String, RoleInfo> {
        self.roles()
            .into_iter()
            .map(|(kind, instance)| {
                (
                    kind.as_str().to_string(),
                    RoleInfo {
                        endpoint: instance.endpoint.clone(),
                        instance_name: Some(instance.instance_name.clone()),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }
}

#[async_trait]
pub trait TopologyResolver: Send + Sync {
    /// `Ok(None)` when no instance follows the naming convention.
    async fn resolve_topology(
        &self,
        session: &Session,
        environment_name: &str,
        region: &str,
    ) -> Result<Option<Topology>>;
}

/// What a describe call tells us about one instance.
#[derive(Debug, Clone, Default)]
pub struct DescribedInstance {
    pub identifier: String,
    pub endpoint: Option<String>,
    pub read_replica_identifiers: Vec<String>,
}

/// Single-instance lookup, the only RDS call topology resolution needs.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    async fn describe_instance(&self, identifier: &str) -> Result<Option<DescribedInstance>>;
}

/// Looks up the primary by name, then re-describes each declared replica to
/// classify it.
pub async fn resolve_from_directory(
    directory: &dyn InstanceDirectory,
    environment_name: &str,
) -> Result<Option<Topology>> {
    let instance_name = primary_instance_name(environment_name);
    let primary = match directory.describe_instance(&instance_name).await? {
        Some(instance) => instance,
        None => return Ok(None),
    };
    let endpoint = primary.endpoint.ok_or_else(|| SyncError::TopologyQuery {
        instance: instance_name.clone(),
        reason: "instance has no endpoint address yet".to_string(),
    })?;

    let mut topology = Topology::new(InstanceEndpoint {
        instance_name,
        endpoint,
    });

    for replica_id in &primary.read_replica_identifiers {
        let replica = match directory.describe_instance(replica_id).await? {
            Some(replica) => replica,
            None => {
                warn!(replica = %replica_id, "declared replica no longer exists");
                continue;
            }
        };
        let Some(endpoint) = replica.endpoint else {
            warn!(replica = %replica.identifier, "replica has no endpoint address yet");
            continue;
        };
        let instance = InstanceEndpoint {
            instance_name: replica.identifier,
            endpoint,
        };
        if !topology.add_replica(instance) {
            debug!(replica = %replica_id, "ignoring replica with unrecognised suffix");
        }
    }

    Ok(Some(topology))
}

/// `InstanceDirectory` over one region-scoped RDS client.
struct RdsDirectory {
    client: rds::Client,
}

#[async_trait]
impl InstanceDirectory for RdsDirectory {
    async fn describe_instance(&self, identifier: &str) -> Result<Option<DescribedInstance>> {
        let response = self
            .client
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await;

        let output = match response {
            Ok(output) => output,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_db_instance_not_found_fault()) =>
            {
                return Ok(None);
            }
            Err(err) => {
                return Err(SyncError::TopologyQuery {
                    instance: identifier.to_string(),
                    reason: DisplayErrorContext(&err).to_string(),
                });
            }
        };

        Ok(output.db_instances().first().map(|instance| DescribedInstance {
            identifier: instance
                .db_instance_identifier()
                .unwrap_or(identifier)
                .to_string(),
            endpoint: instance
                .endpoint()
                .and_then(|e| e.address())
                .map(str::to_string),
            read_replica_identifiers: instance.read_replica_db_instance_identifiers().to_vec(),
        }))
    }
}

#[derive(Debug, Default)]
pub struct RdsTopologyResolver;

#[async_trait]
impl TopologyResolver for RdsTopologyResolver {
    async fn resolve_topology(
        &self,
        session: &Session,
        environment_name: &str,
        region: &str,
    ) -> Result<Option<Topology>> {
        let config = rds::config::Builder::from(session.sdk_config())
            .region(Region::new(region.to_string()))
            .build();
        let directory = RdsDirectory {
            client: rds::Client::from_conf(config),
        };
        resolve_from_directory(&directory, environment_name).await
    }
}
