// pst/src/aws/ssm.rs
use async_trait::async_trait;
use aws_sdk_ssm as ssm;
use ssm::config::Region;
use ssm::error::DisplayErrorContext;
use tracing::debug;

use super::Session;
use crate::errors::{Result, SyncError};

/// `/{environment_name}/database/master-user`
pub fn master_user_path(environment_name: &str) -> String {
    format!("/{}/database/master-user", environment_name)
}

/// `/{environment_name}/database/master-pass`
pub fn master_pass_path(environment_name: &str) -> String {
    format!("/{}/database/master-pass", environment_name)
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Decrypted value at `path`, or `Ok(None)` when the parameter does not exist.
    async fn get_secret(&self, session: &Session, region: &str, path: &str)
        -> Result<Option<String>>;
}

#[derive(Debug, Default)]
pub struct SsmSecretProvider;

#[async_trait]
impl SecretProvider for SsmSecretProvider {
    async fn get_secret(
        &self,
        session: &Session,
        region: &str,
        path: &str,
    ) -> Result<Option<String>> {
        let config = ssm::config::Builder::from(session.sdk_config())
            .region(Region::new(region.to_string()))
            .build();
        let client = ssm::Client::from_conf(config);

        debug!(path, region, "fetching parameter");
        let response = client
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await;

        match response {
            Ok(output) => Ok(output
                .parameter()
                .and_then(|p| p.value())
                .map(str::to_string)),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_parameter_not_found()) =>
            {
                Ok(None)
            }
            Err(err) => Err(SyncError::SecretQuery {
                path: path.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            }),
        }
    }
}
