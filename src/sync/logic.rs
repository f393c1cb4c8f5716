// pst/src/sync/logic.rs
use tracing::{debug, error, info, warn};

use super::{EnvironmentReport, EnvironmentSelector, SyncReport};

use crate::aws::ssm::{master_pass_path, master_user_path};
use crate::aws::{IdentityProvider, SecretProvider, Session, Topology, TopologyResolver};
use crate::config::{AppConfig, ClusterDescriptor, ConfigStore, EnvironmentDescriptor};
use crate::errors::{Result, SyncError};
use crate::pgpass::{ANY_DATABASE, CredentialEntry, CredentialStore, DEFAULT_PORT, UpsertOutcome};

/// How an environment is synchronized, decided once per environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Roles are defined in the descriptor; only pgpass is written.
    LocalSync,
    /// Roles are discovered in AWS and written back to the descriptor.
    CloudSync,
}

impl SyncStrategy {
    pub fn for_environment(app_config: &AppConfig, environment: &str) -> Self {
        if app_config.is_local(environment) {
            SyncStrategy::LocalSync
        } else {
            SyncStrategy::CloudSync
        }
    }
}

/// Result of one cluster in a cloud pass. Errors scoped to the cluster end up
/// in `Failed` and never cross into the environment loop.
#[derive(Debug)]
pub enum ClusterOutcome {
    Resolved(ClusterSync),
    NotFound,
    Failed(SyncError),
}

#[derive(Debug)]
pub struct ClusterSync {
    pub topology: Topology,
    pub appended: usize,
    pub present: usize,
    pub skipped_roles: Vec<String>,
}

/// Cloud coordinates of a cluster, validated before any AWS call.
struct ClusterTarget<'a> {
    profile: String,
    region: &'a str,
    environment_name: &'a str,
}

pub struct SyncOrchestrator {
    app_config: AppConfig,
    config_store: ConfigStore,
    credentials: CredentialStore,
    identity: Box<dyn IdentityProvider>,
    topology: Box<dyn TopologyResolver>,
    secrets: Box<dyn SecretProvider>,
}

impl SyncOrchestrator {
    pub fn new(
        app_config: AppConfig,
        identity: Box<dyn IdentityProvider>,
        topology: Box<dyn TopologyResolver>,
        secrets: Box<dyn SecretProvider>,
    ) -> Self {
        Self {
            config_store: ConfigStore::new(&app_config.config_dir),
            credentials: CredentialStore::new(&app_config.pgpass_path),
            app_config,
            identity,
            topology,
            secrets,
        }
    }

    /// Runs one pass over the selected environments.
    ///
    /// With a single environment, a descriptor or credential-store failure is
    /// returned as an error. With `All`, it is recorded in that environment's
    /// report and the remaining environments still run; only an unreadable
    /// configuration directory fails the whole pass.
    pub async fn sync(&mut self, selector: &EnvironmentSelector) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        match selector {
            EnvironmentSelector::One(environment) => {
                report
                    .environments
                    .push(self.sync_environment(environment).await?);
            }
            EnvironmentSelector::All => {
                let environments = self.config_store.list_environments()?;
                info!(count = environments.len(), "⚙️ Synchronizing all environments");
                for environment in environments {
                    let env_report = match self.sync_environment(&environment).await {
                        Ok(env_report) => env_report,
                        Err(e) => {
                            error!(environment = %environment, error = %e, "environment skipped");
                            EnvironmentReport::failed(&environment, e)
                        }
                    };
                    report.environments.push(env_report);
                }
            }
        }
        Ok(report)
    }

    async fn sync_environment(&mut self, environment: &str) -> Result<EnvironmentReport> {
        let mut descriptor = self.config_store.load(environment)?;
        let mut report = EnvironmentReport::new(environment);

        match SyncStrategy::for_environment(&self.app_config, environment) {
            SyncStrategy::LocalSync => {
                debug!(environment, pgpass = %self.credentials.path().display(), "local sync");
                self.sync_local(&descriptor, &mut report)?;
                info!(environment, "Processed local environment without modifying its descriptor");
            }
            SyncStrategy::CloudSync => {
                self.sync_cloud(environment, &mut descriptor, &mut report)
                    .await?;
                self.config_store.save(environment, &descriptor)?;
                report.descriptor_saved = true;
                info!(environment, "Updated configuration");
            }
        }
        Ok(report)
    }

    fn sync_local(
        &self,
        descriptor: &EnvironmentDescriptor,
        report: &mut EnvironmentReport,
    ) -> Result<()> {
        for (cluster_name, cluster) in &descriptor.clusters {
            for (role, role_info) in cluster.role_entries() {
                let port = role_info.port.unwrap_or_else(|| {
                    debug!(cluster = %cluster_name, role = %role, "no port, using {}", DEFAULT_PORT);
                    DEFAULT_PORT
                });
                let entry = CredentialEntry::new(
                    &role_info.endpoint,
                    port,
                    ANY_DATABASE,
                    &self.app_config.local_username,
                    &self.app_config.local_password,
                );
                self.record_upsert(&entry, report)?;
                info!(cluster = %cluster_name, role = %role, "Updated pgpass");
            }
        }
        report.clusters_resolved = descriptor.clusters.len();
        Ok(())
    }

    async fn sync_cloud(
        &mut self,
        environment: &str,
        descriptor: &mut EnvironmentDescriptor,
        report: &mut EnvironmentReport,
    ) -> Result<()> {
        for (cluster_name, cluster) in descriptor.clusters.iter_mut() {
            match self.process_cluster(cluster_name, cluster).await? {
                ClusterOutcome::Resolved(sync) => {
                    cluster.roles = Some(sync.topology.to_roles());
                    report.clusters_resolved += 1;
                    report.entries_appended += sync.appended;
                    report.entries_present += sync.present;
                    report.roles_skipped.extend(
                        sync.skipped_roles
                            .into_iter()
                            .map(|role| format!("{}/{}", cluster_name, role)),
                    );
                }
                ClusterOutcome::NotFound => {
                    report.clusters_not_found += 1;
                    info!(environment, cluster = %cluster_name, "No RDS instance found, leaving roles unchanged");
                }
                ClusterOutcome::Failed(e) => {
                    report.clusters_failed += 1;
                    error!(environment, cluster = %cluster_name, error = %e, "Skipping this cluster and continuing with the next one");
                }
            }
        }
        Ok(())
    }

    /// Processes one cluster. Only credential-store failures are returned as
    /// `Err`; everything else is folded into the outcome.
    async fn process_cluster(
        &mut self,
        cluster_name: &str,
        cluster: &ClusterDescriptor,
    ) -> Result<ClusterOutcome> {
        let target = match self.cluster_target(cluster_name, cluster) {
            Ok(target) => target,
            Err(e) => return Ok(ClusterOutcome::Failed(e)),
        };

        let session = match self.open_session(&target.profile).await {
            Ok(session) => session,
            Err(e) => return Ok(ClusterOutcome::Failed(e)),
        };
        debug!(cluster = %cluster_name, profile = session.profile(), region = target.region, "session opened");

        let topology = match self
            .topology
            .resolve_topology(&session, target.environment_name, target.region)
            .await
        {
            Ok(Some(topology)) => topology,
            Ok(None) => return Ok(ClusterOutcome::NotFound),
            Err(e) => return Ok(ClusterOutcome::Failed(e)),
        };
        info!(cluster = %cluster_name, instance = %topology.primary.instance_name, "Processing cluster");

        let mut sync = ClusterSync {
            topology,
            appended: 0,
            present: 0,
            skipped_roles: Vec::new(),
        };
        let user_path = master_user_path(target.environment_name);
        let pass_path = master_pass_path(target.environment_name);

        for (kind, instance) in sync.topology.roles() {
            let username = self.fetch_secret(&session, target.region, &user_path).await;
            let password = self.fetch_secret(&session, target.region, &pass_path).await;

            let (Some(username), Some(password)) = (username, password) else {
                warn!(cluster = %cluster_name, role = %kind, "Failed to retrieve credentials for role");
                sync.skipped_roles.push(kind.to_string());
                continue;
            };

            let entry = CredentialEntry::new(
                &instance.endpoint,
                DEFAULT_PORT,
                ANY_DATABASE,
                username,
                password,
            );
            match self.credentials.upsert(&entry)? {
                UpsertOutcome::Appended => sync.appended += 1,
                UpsertOutcome::AlreadyPresent => sync.present += 1,
            }
            info!(cluster = %cluster_name, role = %kind, "Updated pgpass");
        }

        Ok(ClusterOutcome::Resolved(sync))
    }

    fn cluster_target<'a>(
        &self,
        cluster_name: &str,
        cluster: &'a ClusterDescriptor,
    ) -> Result<ClusterTarget<'a>> {
        let account = cluster.require(cluster_name, "aws_account_name")?;
        Ok(ClusterTarget {
            profile: self.app_config.profile_name(account),
            region: cluster.require(cluster_name, "aws_region")?,
            environment_name: cluster.require(cluster_name, "environment_name")?,
        })
    }

    /// Authenticates and hands out a session used by this cluster only.
    async fn open_session(&mut self, profile: &str) -> Result<Session> {
        self.identity.authenticate(profile).await?;
        self.identity.session()
    }

    /// A missing, empty or unreadable secret all mean "no credentials".
    async fn fetch_secret(&self, session: &Session, region: &str, path: &str) -> Option<String> {
        match self.secrets.get_secret(session, region, path).await {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => {
                warn!(path, "Parameter not found");
                None
            }
            Err(e) => {
                warn!(path, error = %e, "Error retrieving SSM parameter");
                None
            }
        }
    }

    fn record_upsert(&self, entry: &CredentialEntry, report: &mut EnvironmentReport) -> Result<()> {
        match self.credentials.upsert(entry)? {
            UpsertOutcome::Appended => report.entries_appended += 1,
            UpsertOutcome::AlreadyPresent => report.entries_present += 1,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::rds::InstanceEndpoint;
    use crate::config::RoleInfo;
    use async_trait::async_trait;
    use aws_config::SdkConfig;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<String>>>;

    #[derive(Default)]
    struct FakeIdentity {
        calls: CallLog,
        rejected: HashSet<String>,
        current: Option<String>,
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn authenticate(&mut self, profile: &str) -> Result<()> {
            self.calls.lock().unwrap().push(profile.to_string());
            if self.rejected.contains(profile) {
                self.current = None;
                return Err(SyncError::Authentication {
                    profile: profile.to_string(),
                    reason: "token expired".to_string(),
                });
            }
            self.current = Some(profile.to_string());
            Ok(())
        }

        fn session(&self) -> Result<Session> {
            self.current
                .as_ref()
                .map(|profile| Session::new(profile.as_str(), SdkConfig::builder().build()))
                .ok_or(SyncError::SessionUnavailable)
        }
    }

    #[derive(Clone)]
    enum FakeTopology {
        Found(Topology),
        Missing,
        Broken,
    }

    #[derive(Default)]
    struct FakeResolver {
        calls: CallLog,
        by_environment: HashMap<String, FakeTopology>,
    }

    #[async_trait]
    impl TopologyResolver for FakeResolver {
        async fn resolve_topology(
            &self,
            session: &Session,
            environment_name: &str,
            region: &str,
        ) -> Result<Option<Topology>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}@{}/{}", environment_name, region, session.profile()));
            match self.by_environment.get(environment_name) {
                Some(FakeTopology::Found(topology)) => Ok(Some(topology.clone())),
                Some(FakeTopology::Broken) => Err(SyncError::TopologyQuery {
                    instance: format!("{}-postgresql", environment_name),
                    reason: "AccessDenied".to_string(),
                }),
                Some(FakeTopology::Missing) | None => Ok(None),
            }
        }
    }

    #[derive(Default)]
    struct FakeSecrets {
        calls: CallLog,
        values: HashMap<String, String>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl SecretProvider for FakeSecrets {
        async fn get_secret(
            &self,
            _session: &Session,
            _region: &str,
            path: &str,
        ) -> Result<Option<String>> {
            self.calls.lock().unwrap().push(path.to_string());
            if self.failing.contains(path) {
                return Err(SyncError::SecretQuery {
                    path: path.to_string(),
                    reason: "ThrottlingException".to_string(),
                });
            }
            Ok(self.values.get(path).cloned())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        config: AppConfig,
        identity_calls: CallLog,
        resolver_calls: CallLog,
        secret_calls: CallLog,
        failing_secrets: Vec<String>,
    }

    impl Harness {
        fn new() -> anyhow::Result<Self> {
            let dir = tempfile::tempdir()?;
            let config_dir = dir.path().join("config");
            fs::create_dir_all(&config_dir)?;
            let config = AppConfig {
                config_dir,
                pgpass_path: dir.path().join(".pgpass"),
                profile_role: "AdministratorAccess".to_string(),
                local_environment: "local".to_string(),
                local_username: "postgres".to_string(),
                local_password: "password".to_string(),
                sso_login: false,
            };
            Ok(Self {
                _dir: dir,
                config,
                identity_calls: CallLog::default(),
                resolver_calls: CallLog::default(),
                secret_calls: CallLog::default(),
                failing_secrets: Vec::new(),
            })
        }

        fn write_descriptor(&self, environment: &str, yaml: &str) -> anyhow::Result<PathBuf> {
            let path = ConfigStore::new(&self.config.config_dir).descriptor_path(environment);
            fs::write(&path, yaml)?;
            Ok(path)
        }

        fn orchestrator(
            &self,
            rejected: &[&str],
            topologies: Vec<(&str, FakeTopology)>,
            secrets: Vec<(&str, &str)>,
        ) -> SyncOrchestrator {
            let identity = FakeIdentity {
                calls: self.identity_calls.clone(),
                rejected: rejected.iter().map(|p| p.to_string()).collect(),
                current: None,
            };
            let resolver = FakeResolver {
                calls: self.resolver_calls.clone(),
                by_environment: topologies
                    .into_iter()
                    .map(|(env, t)| (env.to_string(), t))
                    .collect(),
            };
            let secrets = FakeSecrets {
                calls: self.secret_calls.clone(),
                values: secrets
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                failing: self.failing_secrets.iter().cloned().collect(),
            };
            SyncOrchestrator::new(
                self.config.clone(),
                Box::new(identity),
                Box::new(resolver),
                Box::new(secrets),
            )
        }

        fn pgpass(&self) -> String {
            fs::read_to_string(&self.config.pgpass_path).unwrap_or_default()
        }

        fn load(&self, environment: &str) -> anyhow::Result<EnvironmentDescriptor> {
            Ok(ConfigStore::new(&self.config.config_dir).load(environment)?)
        }
    }

    fn roles_of<'a>(
        descriptor: &'a EnvironmentDescriptor,
        cluster: &str,
    ) -> &'a IndexMap<String, RoleInfo> {
        descriptor.clusters[cluster]
            .roles
            .as_ref()
            .expect("cluster has a roles subtree")
    }

    fn instance(name: &str, endpoint: &str) -> InstanceEndpoint {
        InstanceEndpoint {
            instance_name: name.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    fn prod_topology() -> Topology {
        let mut topology = Topology::new(instance("prod-postgresql", "db.prod.example.com"));
        topology.add_replica(instance("prod-postgresql-read-replica", "ro.prod.example.com"));
        topology
    }

    fn secrets_for(environment_name: &'static str) -> Vec<(&'static str, &'static str)> {
        match environment_name {
            "prod" => vec![
                ("/prod/database/master-user", "admin"),
                ("/prod/database/master-pass", "hunter2"),
            ],
            "stage" => vec![
                ("/stage/database/master-user", "stage_admin"),
                ("/stage/database/master-pass", "stagepw"),
            ],
            _ => vec![],
        }
    }

    const PROD_YAML: &str = r#"
clusters:
  primary-cluster:
    aws_account_name: acme-prod
    aws_region: us-east-1
    environment_name: prod
    roles: {}
"#;

    const THREE_CLUSTERS_YAML: &str = r#"
clusters:
  orders:
    aws_account_name: acme-prod
    aws_region: us-east-1
    environment_name: prod
    roles: {}
  billing:
    aws_account_name: acme-billing
    aws_region: us-west-2
    environment_name: billing
    roles:
      primary:
        endpoint: old-billing.example.com
        instance_name: billing-postgresql
  reporting:
    aws_account_name: acme-stage
    aws_region: eu-west-1
    environment_name: stage
    roles: {}
"#;

    fn stage_topology() -> Topology {
        Topology::new(instance("stage-postgresql", "db.stage.example.com"))
    }

    #[tokio::test]
    async fn test_prod_scenario_writes_primary_and_replica() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", PROD_YAML)?;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(prod_topology()))],
            secrets_for("prod"),
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(
            harness.pgpass(),
            "db.prod.example.com:5432:*:admin:hunter2\nro.prod.example.com:5432:*:admin:hunter2\n"
        );
        let descriptor = harness.load("prod")?;
        let roles = roles_of(&descriptor, "primary-cluster");
        let keys: Vec<&str> = roles.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["primary", "replica"]);
        assert_eq!(roles["primary"].endpoint, "db.prod.example.com");
        assert_eq!(roles["primary"].instance_name.as_deref(), Some("prod-postgresql"));
        assert_eq!(roles["replica"].endpoint, "ro.prod.example.com");
        assert_eq!(
            roles["replica"].instance_name.as_deref(),
            Some("prod-postgresql-read-replica")
        );
        assert_eq!(report.environments[0].entries_appended, 2);
        assert!(report.environments[0].descriptor_saved);
        assert_eq!(
            *harness.identity_calls.lock().unwrap(),
            vec!["acme-prod.AdministratorAccess".to_string()]
        );
        assert_eq!(
            *harness.resolver_calls.lock().unwrap(),
            vec!["prod@us-east-1/acme-prod.AdministratorAccess".to_string()]
        );
        // user + pass for each of the two roles
        assert_eq!(harness.secret_calls.lock().unwrap().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_pass_adds_nothing() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", PROD_YAML)?;
        let selector = EnvironmentSelector::One("prod".to_string());

        harness
            .orchestrator(&[], vec![("prod", FakeTopology::Found(prod_topology()))], secrets_for("prod"))
            .sync(&selector)
            .await?;
        let after_first = harness.pgpass();
        let report = harness
            .orchestrator(&[], vec![("prod", FakeTopology::Found(prod_topology()))], secrets_for("prod"))
            .sync(&selector)
            .await?;

        assert_eq!(harness.pgpass(), after_first);
        assert_eq!(report.environments[0].entries_appended, 0);
        assert_eq!(report.environments[0].entries_present, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_cluster_does_not_stop_the_others() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", THREE_CLUSTERS_YAML)?;
        let mut secrets = secrets_for("prod");
        secrets.extend(secrets_for("stage"));
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![
                ("prod", FakeTopology::Found(prod_topology())),
                ("billing", FakeTopology::Broken),
                ("stage", FakeTopology::Found(stage_topology())),
            ],
            secrets,
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        let env = &report.environments[0];
        assert_eq!(env.clusters_resolved, 2);
        assert_eq!(env.clusters_failed, 1);
        assert!(env.descriptor_saved);

        let descriptor = harness.load("prod")?;
        assert_eq!(roles_of(&descriptor, "orders").len(), 2);
        assert_eq!(
            roles_of(&descriptor, "billing")["primary"].endpoint,
            "old-billing.example.com"
        );
        assert_eq!(
            roles_of(&descriptor, "reporting")["primary"].endpoint,
            "db.stage.example.com"
        );
        assert!(harness.pgpass().contains("db.stage.example.com:5432:*:stage_admin:stagepw\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_profile_only_skips_its_cluster() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", THREE_CLUSTERS_YAML)?;
        let mut secrets = secrets_for("prod");
        secrets.extend(secrets_for("stage"));
        let mut orchestrator = harness.orchestrator(
            &["acme-prod.AdministratorAccess"],
            vec![
                ("prod", FakeTopology::Found(prod_topology())),
                ("billing", FakeTopology::Missing),
                ("stage", FakeTopology::Found(stage_topology())),
            ],
            secrets,
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        let env = &report.environments[0];
        assert_eq!(
            (env.clusters_resolved, env.clusters_not_found, env.clusters_failed),
            (1, 1, 1)
        );
        // no topology query is made without a session
        assert_eq!(harness.resolver_calls.lock().unwrap().len(), 2);
        assert!(roles_of(&harness.load("prod")?, "orders").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cluster_without_region_is_isolated() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor(
            "prod",
            r#"
clusters:
  broken:
    aws_account_name: acme-prod
    environment_name: prod
  healthy:
    aws_account_name: acme-stage
    aws_region: eu-west-1
    environment_name: stage
"#,
        )?;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("stage", FakeTopology::Found(stage_topology()))],
            secrets_for("stage"),
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(report.environments[0].clusters_failed, 1);
        assert_eq!(report.environments[0].clusters_resolved, 1);
        assert_eq!(harness.identity_calls.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_password_skips_credentials_but_keeps_topology() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", PROD_YAML)?;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(prod_topology()))],
            vec![("/prod/database/master-user", "admin")],
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(harness.pgpass(), "");
        assert_eq!(
            report.environments[0].roles_skipped,
            vec!["primary-cluster/primary".to_string(), "primary-cluster/replica".to_string()]
        );
        let descriptor = harness.load("prod")?;
        let roles = roles_of(&descriptor, "primary-cluster");
        assert_eq!(roles["primary"].endpoint, "db.prod.example.com");
        assert_eq!(roles["replica"].endpoint, "ro.prod.example.com");
        Ok(())
    }

    #[tokio::test]
    async fn test_secret_lookup_error_skips_role_but_keeps_topology() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.write_descriptor("prod", PROD_YAML)?;
        harness.failing_secrets = vec!["/prod/database/master-pass".to_string()];
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(prod_topology()))],
            secrets_for("prod"),
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        let env = &report.environments[0];
        assert_eq!((env.clusters_resolved, env.clusters_failed), (1, 0));
        assert_eq!(
            env.roles_skipped,
            vec!["primary-cluster/primary".to_string(), "primary-cluster/replica".to_string()]
        );
        assert!(env.descriptor_saved);
        assert_eq!(harness.pgpass(), "");
        let descriptor = harness.load("prod")?;
        let roles = roles_of(&descriptor, "primary-cluster");
        assert_eq!(roles["primary"].endpoint, "db.prod.example.com");
        assert_eq!(roles["replica"].endpoint, "ro.prod.example.com");
        Ok(())
    }

    #[tokio::test]
    async fn test_not_found_cluster_without_roles_gains_no_roles_key() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let yaml = "clusters:\n  c:\n    aws_account_name: a\n    aws_region: r\n    environment_name: prod\n";
        let path = harness.write_descriptor("prod", yaml)?;
        let mut orchestrator = harness.orchestrator(&[], vec![], vec![]);

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(report.environments[0].clusters_not_found, 1);
        let saved = fs::read_to_string(&path)?;
        assert!(!saved.contains("roles"), "unexpected roles key in:\n{}", saved);
        let before: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let after: serde_yaml::Value = serde_yaml::from_str(&saved)?;
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_utf8_credential_line_does_not_block_sync() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", PROD_YAML)?;
        fs::write(&harness.config.pgpass_path, b"old:5432:*:u:caf\xe9\n")?;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(prod_topology()))],
            secrets_for("prod"),
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(report.environments[0].entries_appended, 2);
        assert!(report.environments[0].descriptor_saved);
        let content = fs::read(&harness.config.pgpass_path)?;
        assert!(content.starts_with(b"old:5432:*:u:caf\xe9\n"));
        assert!(content.ends_with(b"ro.prod.example.com:5432:*:admin:hunter2\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_secret_counts_as_missing() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("prod", PROD_YAML)?;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(Topology::new(instance("prod-postgresql", "db.prod.example.com"))))],
            vec![("/prod/database/master-user", ""), ("/prod/database/master-pass", "hunter2")],
        );

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(report.environments[0].roles_skipped.len(), 1);
        assert_eq!(harness.pgpass(), "");
        Ok(())
    }

    #[tokio::test]
    async fn test_all_not_found_round_trips_descriptor() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let path = harness.write_descriptor("prod", THREE_CLUSTERS_YAML)?;
        let mut orchestrator = harness.orchestrator(&[], vec![], vec![]);

        let report = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await?;

        assert_eq!(report.environments[0].clusters_not_found, 3);
        assert!(report.environments[0].descriptor_saved);
        let before: serde_yaml::Value = serde_yaml::from_str(THREE_CLUSTERS_YAML)?;
        let after: serde_yaml::Value = serde_yaml::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_environment_never_touches_cloud_or_descriptor() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let yaml = r#"# hand maintained, keep comments
clusters:
  dev:
    roles:
      writer:
        endpoint: localhost
        port: 5433
      reader:
        endpoint: 127.0.0.1
        port: 5434
"#;
        let path = harness.write_descriptor("local", yaml)?;
        let mut orchestrator = harness.orchestrator(&[], vec![], vec![]);

        let report = orchestrator
            .sync(&EnvironmentSelector::One("local".to_string()))
            .await?;

        assert_eq!(fs::read_to_string(&path)?, yaml);
        assert_eq!(
            harness.pgpass(),
            "localhost:5433:*:postgres:password\n127.0.0.1:5434:*:postgres:password\n"
        );
        assert!(!report.environments[0].descriptor_saved);
        assert!(harness.identity_calls.lock().unwrap().is_empty());
        assert!(harness.resolver_calls.lock().unwrap().is_empty());
        assert!(harness.secret_calls.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_all_continues_past_a_malformed_environment() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.write_descriptor("broken", "clusters: [oops")?;
        harness.write_descriptor("prod", PROD_YAML)?;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(prod_topology()))],
            secrets_for("prod"),
        );

        let report = orchestrator.sync(&EnvironmentSelector::All).await?;

        let names: Vec<&str> = report.environments.iter().map(|e| e.environment.as_str()).collect();
        assert_eq!(names, vec!["broken", "prod"]);
        assert!(report.environments[0].error.is_some());
        assert!(report.environments[1].descriptor_saved);
        assert!(report.has_failures());
        assert_eq!(harness.pgpass().lines().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_single_unknown_environment_is_an_error() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let mut orchestrator = harness.orchestrator(&[], vec![], vec![]);

        let result = orchestrator
            .sync(&EnvironmentSelector::One("ghost".to_string()))
            .await;

        assert!(matches!(result, Err(SyncError::ConfigNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_unusable_credential_file_aborts_environment_without_saving() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        let path = harness.write_descriptor("prod", PROD_YAML)?;
        // a directory where the credential file should be
        let blocked = harness._dir.path().join("blocked");
        fs::create_dir_all(&blocked)?;
        harness.config.pgpass_path = blocked;
        let mut orchestrator = harness.orchestrator(
            &[],
            vec![("prod", FakeTopology::Found(prod_topology()))],
            secrets_for("prod"),
        );

        let result = orchestrator
            .sync(&EnvironmentSelector::One("prod".to_string()))
            .await;

        assert!(matches!(result, Err(SyncError::CredentialStore { .. })));
        assert_eq!(fs::read_to_string(&path)?, PROD_YAML);
        Ok(())
    }

    #[test]
    fn test_strategy_follows_local_environment_name() -> anyhow::Result<()> {
        let harness = Harness::new()?;

        assert_eq!(
            SyncStrategy::for_environment(&harness.config, "local"),
            SyncStrategy::LocalSync
        );
        assert_eq!(
            SyncStrategy::for_environment(&harness.config, "prod"),
            SyncStrategy::CloudSync
        );
        Ok(())
    }
}
