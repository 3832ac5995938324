//! CI service registration client.
//!
//! The CI service exposes REST collections for `build-clouds` (compute
//! provisioning profiles) and `build-worker-images` (VM images its workers
//! boot from), authenticated with a bearer token. Registration is
//! idempotent: an existing record with matching fields is left alone, a
//! drifted record is updated in place, and a missing record is created.

use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CiConfig;
use crate::provider::ProviderFuture;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const BUILD_CLOUDS_PATH: &str = "api/v1/build-clouds";
const WORKER_IMAGES_PATH: &str = "api/v1/build-worker-images";
const HEALTH_PATH: &str = "api/v1/health";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Desired state of a build cloud record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BuildCloudSpec {
    /// Record name, unique per CI installation.
    pub name: String,
    /// Provider discriminator understood by the CI service.
    pub provider: String,
    /// Subscription the workers are provisioned into.
    pub subscription_id: String,
    /// Resource group owning the worker resources.
    pub resource_group: String,
    /// Region workers start in.
    pub location: String,
    /// VM size workers are started with.
    pub vm_size: String,
    /// Virtual network workers attach to.
    pub virtual_network: String,
    /// Subnet inside the virtual network.
    pub subnet: String,
    /// Network security group applied to workers.
    pub security_group: String,
    /// Storage account holding worker images.
    pub storage_account: String,
}

/// Desired state of a build worker image record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct WorkerImageSpec {
    /// Record name, unique per CI installation.
    pub name: String,
    /// Image location the CI service boots workers from.
    pub image_uri: String,
    /// Build cloud the image belongs to.
    pub build_cloud: String,
}

/// A registry record as stored by the CI service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Record<S> {
    /// Identifier assigned by the CI service.
    pub id: String,
    /// The record fields.
    #[serde(flatten)]
    pub spec: S,
}

/// What an ensure call did to a registry record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordAction {
    /// The record was created.
    Created,
    /// The record existed but had drifted and was updated.
    Updated,
    /// The record already matched the desired state.
    Unchanged,
}

/// Result of reconciling a registry record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordOutcome<S> {
    /// The record after reconciliation.
    pub record: Record<S>,
    /// Action the reconciliation performed.
    pub action: RecordAction,
}

/// Errors raised by the CI service client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when the configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the service health endpoint does not answer 200.
    #[error("CI service unhealthy: {endpoint} answered {status}")]
    Unhealthy {
        /// Endpoint probed.
        endpoint: String,
        /// HTTP status returned.
        status: u16,
    },
    /// Raised when the bearer token is rejected.
    #[error("CI service rejected the API token (status {status})")]
    Unauthorized {
        /// HTTP status returned.
        status: u16,
    },
    /// Raised when the service rejects a request.
    #[error("CI service returned {status} for {operation}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Operation being attempted.
        operation: String,
        /// Response body, when one was returned.
        message: String,
    },
    /// Raised on transport level failures.
    #[error("transport error: {message}")]
    Transport {
        /// Message from the HTTP client.
        message: String,
    },
    /// Raised when a response cannot be decoded.
    #[error("failed to decode response for {operation}: {message}")]
    Decode {
        /// Operation whose response could not be decoded.
        operation: String,
        /// Decoder error message.
        message: String,
    },
}

impl From<crate::config::ConfigError> for RegistryError {
    fn from(value: crate::config::ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

/// Operations the pipeline needs from the CI service.
pub trait Registry {
    /// Registry specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Verifies the service is reachable and the token is accepted.
    fn check_service(&self) -> ProviderFuture<'_, (), Self::Error>;

    /// Ensures a build cloud record matches the desired state.
    fn ensure_build_cloud<'a>(
        &'a self,
        spec: &'a BuildCloudSpec,
    ) -> ProviderFuture<'a, RecordOutcome<BuildCloudSpec>, Self::Error>;

    /// Ensures a build worker image record matches the desired state.
    fn ensure_worker_image<'a>(
        &'a self,
        spec: &'a WorkerImageSpec,
    ) -> ProviderFuture<'a, RecordOutcome<WorkerImageSpec>, Self::Error>;
}

/// REST client for the CI service registry.
#[derive(Clone, Debug)]
pub struct HttpRegistry {
    config: CiConfig,
}

impl HttpRegistry {
    /// Constructs a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] when validation fails.
    pub fn new(config: CiConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        operation: &str,
    ) -> Result<T, RegistryError> {
        let response = HTTP_CLIENT
            .get(self.url(path))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|err| RegistryError::Transport {
                message: err.to_string(),
            })?;
        Self::decode(response, operation).await
    }

    async fn send_json<T, B>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
        operation: &str,
    ) -> Result<T, RegistryError>
    where
        T: serde::de::DeserializeOwned,
        B: Serialize,
    {
        let response = HTTP_CLIENT
            .request(method, self.url(path))
            .bearer_auth(&self.config.api_token)
            .json(body)
            .send()
            .await
            .map_err(|err| RegistryError::Transport {
                message: err.to_string(),
            })?;
        Self::decode(response, operation).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, RegistryError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| RegistryError::Transport {
                message: err.to_string(),
            })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RegistryError::Unauthorized {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(RegistryError::Api {
                status: status.as_u16(),
                operation: operation.to_owned(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|err| RegistryError::Decode {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }

    async fn check_service_inner(&self) -> Result<(), RegistryError> {
        let health_url = self.url(HEALTH_PATH);
        let response = HTTP_CLIENT
            .get(&health_url)
            .send()
            .await
            .map_err(|err| RegistryError::Transport {
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(RegistryError::Unhealthy {
                endpoint: health_url,
                status: response.status().as_u16(),
            });
        }

        // An authenticated list call proves the token before any mutation.
        let _clouds: Vec<Record<BuildCloudSpec>> =
            self.get(BUILD_CLOUDS_PATH, "list build clouds").await?;
        Ok(())
    }

    async fn reconcile<S>(
        &self,
        collection: &'static str,
        spec: &S,
        existing: Option<Record<S>>,
    ) -> Result<RecordOutcome<S>, RegistryError>
    where
        S: Clone + Eq + Serialize + serde::de::DeserializeOwned,
    {
        match existing {
            Some(record) if record.spec == *spec => Ok(RecordOutcome {
                record,
                action: RecordAction::Unchanged,
            }),
            Some(record) => {
                let path = format!("{collection}/{}", record.id);
                let updated: Record<S> = self
                    .send_json(reqwest::Method::PUT, &path, spec, "update record")
                    .await?;
                Ok(RecordOutcome {
                    record: updated,
                    action: RecordAction::Updated,
                })
            }
            None => {
                let created: Record<S> = self
                    .send_json(reqwest::Method::POST, collection, spec, "create record")
                    .await?;
                Ok(RecordOutcome {
                    record: created,
                    action: RecordAction::Created,
                })
            }
        }
    }

    async fn find_by_name<S>(
        &self,
        collection: &'static str,
        name: &str,
        pick_name: impl Fn(&S) -> &str,
    ) -> Result<Option<Record<S>>, RegistryError>
    where
        S: serde::de::DeserializeOwned,
    {
        let records: Vec<Record<S>> = self.get(collection, "list records").await?;
        Ok(records
            .into_iter()
            .find(|record| pick_name(&record.spec) == name))
    }

    async fn ensure_build_cloud_inner(
        &self,
        spec: &BuildCloudSpec,
    ) -> Result<RecordOutcome<BuildCloudSpec>, RegistryError> {
        let existing = self
            .find_by_name(BUILD_CLOUDS_PATH, &spec.name, |cloud: &BuildCloudSpec| {
                &cloud.name
            })
            .await?;
        self.reconcile(BUILD_CLOUDS_PATH, spec, existing).await
    }

    async fn ensure_worker_image_inner(
        &self,
        spec: &WorkerImageSpec,
    ) -> Result<RecordOutcome<WorkerImageSpec>, RegistryError> {
        let existing = self
            .find_by_name(WORKER_IMAGES_PATH, &spec.name, |image: &WorkerImageSpec| {
                &image.name
            })
            .await?;
        self.reconcile(WORKER_IMAGES_PATH, spec, existing).await
    }
}

impl Registry for HttpRegistry {
    type Error = RegistryError;

    fn check_service(&self) -> ProviderFuture<'_, (), Self::Error> {
        Box::pin(self.check_service_inner())
    }

    fn ensure_build_cloud<'a>(
        &'a self,
        spec: &'a BuildCloudSpec,
    ) -> ProviderFuture<'a, RecordOutcome<BuildCloudSpec>, Self::Error> {
        Box::pin(self.ensure_build_cloud_inner(spec))
    }

    fn ensure_worker_image<'a>(
        &'a self,
        spec: &'a WorkerImageSpec,
    ) -> ProviderFuture<'a, RecordOutcome<WorkerImageSpec>, Self::Error> {
        Box::pin(self.ensure_worker_image_inner(spec))
    }
}
