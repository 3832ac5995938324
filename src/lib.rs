//! Core library for the Cumulus build-environment provisioner.
//!
//! The crate drives a sequential pipeline that authenticates against a
//! cloud provider, idempotently ensures the resources a CI build cloud
//! needs (resource group, storage accounts, network, security group),
//! produces a worker VM image via an external builder tool, and registers
//! the environment with a CI service over its REST API.

pub mod azure;
pub mod builder;
pub mod config;
pub mod preflight;
pub mod provider;
pub mod provision;
pub mod registry;
pub mod select;

pub use azure::{AzureProvider, AzureProviderError};
pub use builder::{
    BuildVariable, BuilderError, CommandOutput, CommandRunner, ImageArtifact, ImageBuilder,
    ProcessCommandRunner,
};
pub use config::{AzureConfig, BuilderConfig, CiConfig, ConfigError};
pub use preflight::{PreflightError, run_preflight};
pub use provider::{
    CloudProvider, EnsureOutcome, Location, ProviderFuture, ResourceGroupSpec, ResourceHandle,
    Scope, SecurityGroupSpec, SpecError, StorageAccountSpec, StoragePurpose, Subscription,
    VirtualNetworkSpec, VmSize, ensure_with,
};
pub use provision::{
    ImageSource, ProvisionError, ProvisionOrchestrator, ProvisionOutcome, ProvisionRequest,
};
pub use registry::{
    BuildCloudSpec, HttpRegistry, Record, RecordAction, RecordOutcome, Registry, RegistryError,
    WorkerImageSpec,
};
pub use select::{PromptError, Prompter, SelectError, Selection, StdinPrompter, resolve_selection};
