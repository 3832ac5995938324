//! Azure implementation of the cloud provider management plane.
//!
//! All calls go straight to the REST management API with a cached OAuth2
//! client-credentials token. Endpoint bases are configurable so sovereign
//! clouds and tests can point the provider elsewhere.

mod auth;
mod error;
mod principal;
mod resources;

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use crate::config::AzureConfig;
use crate::provider::{
    CloudProvider, EnsureOutcome, Location, ProviderFuture, ResourceGroupSpec, ResourceHandle,
    Scope, SecurityGroupSpec, StorageAccountSpec, Subscription, VirtualNetworkSpec, VmSize,
};

pub use error::AzureProviderError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Provider that manages build resources through the Azure management API.
#[derive(Debug)]
pub struct AzureProvider {
    config: AzureConfig,
    tokens: Mutex<HashMap<String, String>>,
}

impl AzureProvider {
    /// Constructs a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AzureProviderError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: AzureConfig) -> Result<Self, AzureProviderError> {
        config.validate()?;
        Ok(Self {
            config,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Read access to the validated configuration.
    #[must_use]
    pub const fn config(&self) -> &AzureConfig {
        &self.config
    }
}

impl CloudProvider for AzureProvider {
    type Error = AzureProviderError;

    fn verify_credentials(&self) -> ProviderFuture<'_, (), Self::Error> {
        Box::pin(async move {
            self.bearer(&self.config.management_endpoint).await?;
            Ok(())
        })
    }

    fn list_subscriptions(&self) -> ProviderFuture<'_, Vec<Subscription>, Self::Error> {
        Box::pin(self.list_subscriptions_inner())
    }

    fn list_locations<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> ProviderFuture<'a, Vec<Location>, Self::Error> {
        Box::pin(self.list_locations_inner(scope))
    }

    fn list_vm_sizes<'a>(
        &'a self,
        scope: &'a Scope,
        location: &'a str,
    ) -> ProviderFuture<'a, Vec<VmSize>, Self::Error> {
        Box::pin(self.list_vm_sizes_inner(scope, location))
    }

    fn ensure_service_principal(
        &self,
    ) -> ProviderFuture<'_, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(self.ensure_service_principal_inner())
    }

    fn ensure_resource_group<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a ResourceGroupSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(self.ensure_resource_group_inner(scope, spec))
    }

    fn ensure_storage_account<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a StorageAccountSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(self.ensure_storage_account_inner(scope, spec))
    }

    fn ensure_virtual_network<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a VirtualNetworkSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(self.ensure_virtual_network_inner(scope, spec))
    }

    fn ensure_security_group<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a SecurityGroupSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(self.ensure_security_group_inner(scope, spec))
    }
}
