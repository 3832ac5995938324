//! Configuration loading via `ortho-config`.
//!
//! Three sections drive a provisioning run: the cloud provider credentials
//! and resource names ([`AzureConfig`]), the CI service connection
//! ([`CiConfig`]), and the external image builder ([`BuilderConfig`]).
//! Values merge defaults, `cumulus.toml`, environment variables, and CLI
//! flags in that order of precedence.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Cloud provider credentials, endpoints, and resource naming.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AZURE",
    discovery(
        app_name = "cumulus",
        env_var = "CUMULUS_CONFIG_PATH",
        config_file_name = "cumulus.toml",
        dotfile_name = ".cumulus.toml",
        project_file_name = "cumulus.toml"
    )
)]
pub struct AzureConfig {
    /// Directory (tenant) identifier used for token acquisition.
    pub tenant_id: String,
    /// Application (client) identifier of the service principal.
    pub client_id: String,
    /// Client secret used for token acquisition.
    pub client_secret: String,
    /// Subscription to provision into. Resolved interactively when absent.
    pub subscription_id: Option<String>,
    /// Region to provision into. Resolved interactively when absent.
    pub location: Option<String>,
    /// VM size registered with the build cloud. Resolved interactively when
    /// absent.
    pub vm_size: Option<String>,
    /// Resource group that owns every provisioned resource.
    #[ortho_config(default = "cumulus-build".to_owned())]
    pub resource_group: String,
    /// Prefix for the three derived storage account names. The derived name
    /// (`prefix` plus a purpose suffix) must stay within 24 characters.
    #[ortho_config(default = "cumulusbuild".to_owned())]
    pub storage_prefix: String,
    /// Virtual network name.
    #[ortho_config(default = "cumulus-build-net".to_owned())]
    pub virtual_network: String,
    /// Subnet name inside the virtual network.
    #[ortho_config(default = "build-workers".to_owned())]
    pub subnet: String,
    /// Address space for the virtual network.
    #[ortho_config(default = "10.10.0.0/16".to_owned())]
    pub address_space: String,
    /// Address prefix carved out for the build subnet.
    #[ortho_config(default = "10.10.1.0/24".to_owned())]
    pub subnet_prefix: String,
    /// Network security group name.
    #[ortho_config(default = "cumulus-build-nsg".to_owned())]
    pub security_group: String,
    /// Base URL of the management API.
    #[ortho_config(default = "https://management.azure.com".to_owned())]
    pub management_endpoint: String,
    /// Base URL of the token authority.
    #[ortho_config(default = "https://login.microsoftonline.com".to_owned())]
    pub authority_endpoint: String,
    /// Base URL of the directory (service principal) API.
    #[ortho_config(default = "https://graph.microsoft.com".to_owned())]
    pub graph_endpoint: String,
}

/// CI service connection and record naming.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CUMULUS_CI")]
pub struct CiConfig {
    /// Base URL of the CI service API.
    pub endpoint: String,
    /// Bearer token used to authenticate API calls.
    pub api_token: String,
    /// Name of the build cloud record to create or update.
    #[ortho_config(default = "azure-build-cloud".to_owned())]
    pub build_cloud: String,
    /// Name of the build worker image record to create or update.
    #[ortho_config(default = "azure-build-worker".to_owned())]
    pub worker_image: String,
}

/// External image builder invocation settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CUMULUS_BUILDER")]
pub struct BuilderConfig {
    /// Path to the image builder executable.
    #[ortho_config(default = "packer".to_owned())]
    pub builder_bin: String,
    /// Template file handed to the builder.
    #[ortho_config(default = "build-worker.pkr.hcl".to_owned())]
    pub template: String,
    /// Manifest file the builder writes the resulting image reference to.
    #[ortho_config(default = "build-manifest.json".to_owned())]
    pub manifest: String,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in cumulus.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl AzureConfig {
    /// Loads provider configuration without parsing CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cumulus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable, TOML key, and configuration file so the fix
    /// is actionable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.tenant_id,
            &FieldMetadata::new("directory tenant ID", "AZURE_TENANT_ID", "tenant_id", "azure"),
        )?;
        require_field(
            &self.client_id,
            &FieldMetadata::new(
                "service principal client ID",
                "AZURE_CLIENT_ID",
                "client_id",
                "azure",
            ),
        )?;
        require_field(
            &self.client_secret,
            &FieldMetadata::new(
                "service principal client secret",
                "AZURE_CLIENT_SECRET",
                "client_secret",
                "azure",
            ),
        )?;
        require_field(
            &self.resource_group,
            &FieldMetadata::new(
                "resource group name",
                "AZURE_RESOURCE_GROUP",
                "resource_group",
                "azure",
            ),
        )?;
        require_field(
            &self.storage_prefix,
            &FieldMetadata::new(
                "storage account prefix",
                "AZURE_STORAGE_PREFIX",
                "storage_prefix",
                "azure",
            ),
        )?;
        require_field(
            &self.virtual_network,
            &FieldMetadata::new(
                "virtual network name",
                "AZURE_VIRTUAL_NETWORK",
                "virtual_network",
                "azure",
            ),
        )?;
        require_field(
            &self.security_group,
            &FieldMetadata::new(
                "network security group name",
                "AZURE_SECURITY_GROUP",
                "security_group",
                "azure",
            ),
        )?;
        require_field(
            &self.management_endpoint,
            &FieldMetadata::new(
                "management API endpoint",
                "AZURE_MANAGEMENT_ENDPOINT",
                "management_endpoint",
                "azure",
            ),
        )?;
        require_field(
            &self.authority_endpoint,
            &FieldMetadata::new(
                "token authority endpoint",
                "AZURE_AUTHORITY_ENDPOINT",
                "authority_endpoint",
                "azure",
            ),
        )?;
        Ok(())
    }
}

impl CiConfig {
    /// Loads CI configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cumulus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the required CI connection fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.endpoint,
            &FieldMetadata::new("CI service endpoint", "CUMULUS_CI_ENDPOINT", "endpoint", "ci"),
        )?;
        require_field(
            &self.api_token,
            &FieldMetadata::new("CI API token", "CUMULUS_CI_API_TOKEN", "api_token", "ci"),
        )?;
        require_field(
            &self.build_cloud,
            &FieldMetadata::new(
                "build cloud name",
                "CUMULUS_CI_BUILD_CLOUD",
                "build_cloud",
                "ci",
            ),
        )?;
        require_field(
            &self.worker_image,
            &FieldMetadata::new(
                "build worker image name",
                "CUMULUS_CI_WORKER_IMAGE",
                "worker_image",
                "ci",
            ),
        )?;
        Ok(())
    }
}

impl BuilderConfig {
    /// Loads builder configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("cumulus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the builder invocation fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.builder_bin,
            &FieldMetadata::new(
                "image builder executable",
                "CUMULUS_BUILDER_BUILDER_BIN",
                "builder_bin",
                "builder",
            ),
        )?;
        require_field(
            &self.template,
            &FieldMetadata::new(
                "builder template path",
                "CUMULUS_BUILDER_TEMPLATE",
                "template",
                "builder",
            ),
        )?;
        require_field(
            &self.manifest,
            &FieldMetadata::new(
                "builder manifest path",
                "CUMULUS_BUILDER_MANIFEST",
                "manifest",
                "builder",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
