//! Orchestrates the end-to-end build environment provisioning pipeline.
//!
//! The pipeline is deliberately sequential: service principal, resource
//! group, storage accounts, virtual network, security group, VM image, and
//! finally the CI service records. Every step is a get-or-create call, so
//! rerunning the pipeline with identical inputs leaves remote state
//! untouched. A failing step aborts the run; already provisioned resources
//! are left in place and reconciled by the next run.

use log::info;
use thiserror::Error;

use crate::builder::{BuildVariable, BuilderError, CommandRunner, ImageBuilder};
use crate::config::{AzureConfig, CiConfig};
use crate::provider::{
    CloudProvider, EnsureOutcome, ResourceGroupSpec, ResourceHandle, Scope, SecurityGroupSpec,
    SpecError, StorageAccountSpec, StoragePurpose, VirtualNetworkSpec,
};
use crate::registry::{BuildCloudSpec, RecordOutcome, Registry, WorkerImageSpec};
use crate::select::Selection;

/// Where the worker VM image comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageSource {
    /// A pre-existing image reference; the builder is not invoked.
    Existing(String),
    /// Build a fresh image, passing these extra variables to the builder.
    Build {
        /// Caller-supplied variables appended after the derived ones.
        variables: Vec<BuildVariable>,
    },
}

/// Fully resolved inputs for one provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Subscription scope for all management calls.
    pub scope: Scope,
    /// Region every resource is placed in.
    pub location: String,
    /// VM size registered with the build cloud.
    pub vm_size: String,
    /// Resource group parameters.
    pub resource_group: ResourceGroupSpec,
    /// The three storage accounts, in provisioning order.
    pub storage_accounts: Vec<StorageAccountSpec>,
    /// Virtual network parameters.
    pub network: VirtualNetworkSpec,
    /// Network security group parameters.
    pub security_group: SecurityGroupSpec,
    /// Image source for the worker image.
    pub image: ImageSource,
    /// Name of the build cloud record on the CI service.
    pub build_cloud_name: String,
    /// Name of the worker image record on the CI service.
    pub worker_image_name: String,
}

impl ProvisionRequest {
    /// Builds a request from validated configuration and a resolved
    /// placement.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when a derived storage account name violates
    /// provider constraints.
    pub fn from_config(
        azure: &AzureConfig,
        ci: &CiConfig,
        selection: &Selection,
        image: ImageSource,
    ) -> Result<Self, SpecError> {
        let storage_accounts = StoragePurpose::all()
            .into_iter()
            .map(|purpose| {
                StorageAccountSpec::derive(
                    &azure.storage_prefix,
                    purpose,
                    azure.resource_group.clone(),
                    selection.location.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            scope: selection.scope.clone(),
            location: selection.location.clone(),
            vm_size: selection.vm_size.clone(),
            resource_group: ResourceGroupSpec {
                name: azure.resource_group.clone(),
                location: selection.location.clone(),
            },
            storage_accounts,
            network: VirtualNetworkSpec {
                name: azure.virtual_network.clone(),
                subnet_name: azure.subnet.clone(),
                address_space: azure.address_space.clone(),
                subnet_prefix: azure.subnet_prefix.clone(),
                resource_group: azure.resource_group.clone(),
                location: selection.location.clone(),
            },
            security_group: SecurityGroupSpec {
                name: azure.security_group.clone(),
                resource_group: azure.resource_group.clone(),
                location: selection.location.clone(),
            },
            image,
            build_cloud_name: ci.build_cloud.clone(),
            worker_image_name: ci.worker_image.clone(),
        })
    }

    /// Name of the storage account holding worker images.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Empty`] when the request carries no image
    /// storage account.
    pub fn image_storage_account(&self) -> Result<&str, SpecError> {
        self.storage_accounts
            .iter()
            .find(|spec| spec.purpose == StoragePurpose::Images)
            .map(|spec| spec.name.as_str())
            .ok_or_else(|| SpecError::Empty("image storage account".to_owned()))
    }

    /// Variables derived from the provisioned environment, handed to the
    /// builder ahead of any caller-supplied ones.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Empty`] when the request carries no image
    /// storage account.
    pub fn derived_build_variables(&self) -> Result<Vec<BuildVariable>, SpecError> {
        Ok(vec![
            BuildVariable::new("subscription_id", &self.scope.subscription_id),
            BuildVariable::new("resource_group", &self.resource_group.name),
            BuildVariable::new("location", &self.location),
            BuildVariable::new("vm_size", &self.vm_size),
            BuildVariable::new("storage_account", self.image_storage_account()?),
            BuildVariable::new("virtual_network", &self.network.name),
            BuildVariable::new("subnet", &self.network.subnet_name),
            BuildVariable::new("security_group", &self.security_group.name),
        ])
    }
}

/// Everything a successful run provisioned or confirmed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionOutcome {
    /// Service principal handle.
    pub principal: EnsureOutcome<ResourceHandle>,
    /// Resource group handle.
    pub resource_group: EnsureOutcome<ResourceHandle>,
    /// Storage account handles, in provisioning order.
    pub storage_accounts: Vec<EnsureOutcome<ResourceHandle>>,
    /// Virtual network handle.
    pub network: EnsureOutcome<ResourceHandle>,
    /// Network security group handle.
    pub security_group: EnsureOutcome<ResourceHandle>,
    /// Image the worker record points at.
    pub image_uri: String,
    /// Build cloud record after reconciliation.
    pub build_cloud: RecordOutcome<BuildCloudSpec>,
    /// Worker image record after reconciliation.
    pub worker_image: RecordOutcome<WorkerImageSpec>,
}

/// Errors surfaced while running the pipeline.
#[derive(Debug, Error)]
pub enum ProvisionError<PE, GE>
where
    PE: std::error::Error + 'static,
    GE: std::error::Error + 'static,
{
    /// Raised when the request itself is inconsistent.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// Raised when the service principal cannot be ensured.
    #[error("failed to ensure service principal: {0}")]
    Principal(#[source] PE),
    /// Raised when the resource group cannot be ensured.
    #[error("failed to ensure resource group: {0}")]
    ResourceGroup(#[source] PE),
    /// Raised when a storage account cannot be ensured.
    #[error("failed to ensure storage account '{name}': {source}")]
    Storage {
        /// Account that failed.
        name: String,
        /// Provider error.
        #[source]
        source: PE,
    },
    /// Raised when the virtual network cannot be ensured.
    #[error("failed to ensure virtual network: {0}")]
    Network(#[source] PE),
    /// Raised when the security group cannot be ensured.
    #[error("failed to ensure network security group: {0}")]
    SecurityGroup(#[source] PE),
    /// Raised when an image build was requested but no builder is wired.
    #[error("an image build was requested but no builder is configured")]
    MissingBuilder,
    /// Raised when the image build fails.
    #[error("image build failed: {0}")]
    ImageBuild(#[source] BuilderError),
    /// Raised when the build cloud record cannot be reconciled.
    #[error("failed to register build cloud: {0}")]
    BuildCloud(#[source] GE),
    /// Raised when the worker image record cannot be reconciled.
    #[error("failed to register build worker image: {0}")]
    WorkerImage(#[source] GE),
}

/// Executes the provisioning pipeline against injected collaborators.
#[derive(Debug)]
pub struct ProvisionOrchestrator<P, R: CommandRunner, G> {
    provider: P,
    builder: Option<ImageBuilder<R>>,
    registry: G,
}

impl<P, R, G> ProvisionOrchestrator<P, R, G>
where
    P: CloudProvider,
    R: CommandRunner,
    G: Registry,
{
    /// Creates a new orchestrator. `builder` may be `None` when every run
    /// will use a pre-existing image.
    #[must_use]
    pub const fn new(provider: P, builder: Option<ImageBuilder<R>>, registry: G) -> Self {
        Self {
            provider,
            builder,
            registry,
        }
    }

    /// Borrow of the wired image builder, when one is present.
    #[must_use]
    pub const fn builder(&self) -> Option<&ImageBuilder<R>> {
        self.builder.as_ref()
    }

    /// Runs the pipeline and returns the provisioned environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] naming the step that failed. Nothing is
    /// rolled back; a rerun reconciles partial state.
    pub async fn execute(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionOutcome, ProvisionError<P::Error, G::Error>> {
        let principal = self
            .provider
            .ensure_service_principal()
            .await
            .map_err(ProvisionError::Principal)?;
        log_step("service principal", &principal);

        let resource_group = self
            .provider
            .ensure_resource_group(&request.scope, &request.resource_group)
            .await
            .map_err(ProvisionError::ResourceGroup)?;
        log_step("resource group", &resource_group);

        let storage_accounts = self.ensure_storage_accounts(request).await?;

        let network = self
            .provider
            .ensure_virtual_network(&request.scope, &request.network)
            .await
            .map_err(ProvisionError::Network)?;
        log_step("virtual network", &network);

        let security_group = self
            .provider
            .ensure_security_group(&request.scope, &request.security_group)
            .await
            .map_err(ProvisionError::SecurityGroup)?;
        log_step("network security group", &security_group);

        let image_uri = self.resolve_image(request)?;

        let build_cloud_spec = self.build_cloud_spec(request)?;
        let build_cloud = self
            .registry
            .ensure_build_cloud(&build_cloud_spec)
            .await
            .map_err(ProvisionError::BuildCloud)?;
        info!(
            "build cloud '{}' {:?}",
            build_cloud.record.spec.name, build_cloud.action
        );

        let worker_image_spec = WorkerImageSpec {
            name: request.worker_image_name.clone(),
            image_uri: image_uri.clone(),
            build_cloud: request.build_cloud_name.clone(),
        };
        let worker_image = self
            .registry
            .ensure_worker_image(&worker_image_spec)
            .await
            .map_err(ProvisionError::WorkerImage)?;
        info!(
            "build worker image '{}' {:?}",
            worker_image.record.spec.name, worker_image.action
        );

        Ok(ProvisionOutcome {
            principal,
            resource_group,
            storage_accounts,
            network,
            security_group,
            image_uri,
            build_cloud,
            worker_image,
        })
    }

    async fn ensure_storage_accounts(
        &self,
        request: &ProvisionRequest,
    ) -> Result<Vec<EnsureOutcome<ResourceHandle>>, ProvisionError<P::Error, G::Error>> {
        let mut outcomes = Vec::with_capacity(request.storage_accounts.len());
        for spec in &request.storage_accounts {
            let outcome = self
                .provider
                .ensure_storage_account(&request.scope, spec)
                .await
                .map_err(|source| ProvisionError::Storage {
                    name: spec.name.clone(),
                    source,
                })?;
            log_step("storage account", &outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn resolve_image(
        &self,
        request: &ProvisionRequest,
    ) -> Result<String, ProvisionError<P::Error, G::Error>> {
        match &request.image {
            ImageSource::Existing(uri) => {
                info!("using pre-existing image {uri}");
                Ok(uri.clone())
            }
            ImageSource::Build { variables } => {
                let builder = self.builder.as_ref().ok_or(ProvisionError::MissingBuilder)?;
                let mut all_variables = request.derived_build_variables()?;
                all_variables.extend(variables.iter().cloned());
                info!(
                    "building worker image with {} (template {})",
                    builder.config().builder_bin,
                    builder.config().template
                );
                let artifact = builder
                    .build(&all_variables)
                    .map_err(ProvisionError::ImageBuild)?;
                info!("built worker image {}", artifact.image_uri);
                Ok(artifact.image_uri)
            }
        }
    }

    fn build_cloud_spec(
        &self,
        request: &ProvisionRequest,
    ) -> Result<BuildCloudSpec, ProvisionError<P::Error, G::Error>> {
        Ok(BuildCloudSpec {
            name: request.build_cloud_name.clone(),
            provider: String::from("azure"),
            subscription_id: request.scope.subscription_id.clone(),
            resource_group: request.resource_group.name.clone(),
            location: request.location.clone(),
            vm_size: request.vm_size.clone(),
            virtual_network: request.network.name.clone(),
            subnet: request.network.subnet_name.clone(),
            security_group: request.security_group.name.clone(),
            storage_account: request.image_storage_account()?.to_owned(),
        })
    }
}

fn log_step(kind: &str, outcome: &EnsureOutcome<ResourceHandle>) {
    if outcome.created {
        info!("{kind} '{}' created", outcome.value.name);
    } else {
        info!("{kind} '{}' already present", outcome.value.name);
    }
}
