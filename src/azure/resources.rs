//! Management-plane resource operations for the Azure provider.
//!
//! Each ensure call follows the same shape: a scoped GET that treats 404 as
//! "absent", and a PUT that creates the resource when the lookup missed. The
//! two halves are wired together through [`crate::provider::ensure_with`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::provider::{
    EnsureOutcome, Location, ResourceGroupSpec, ResourceHandle, Scope, SecurityGroupSpec,
    StorageAccountSpec, Subscription, VirtualNetworkSpec, VmSize, ensure_with,
};

use super::{AzureProvider, AzureProviderError, HTTP_CLIENT};

const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";
const STORAGE_API_VERSION: &str = "2023-01-01";
const NETWORK_API_VERSION: &str = "2023-05-01";
const SUBSCRIPTION_API_VERSION: &str = "2021-01-01";
const COMPUTE_API_VERSION: &str = "2023-07-01";

#[derive(Deserialize)]
struct ResourceDocument {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ValueEnvelope<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
struct SubscriptionDocument {
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Deserialize)]
struct LocationDocument {
    name: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Deserialize)]
struct VmSizeDocument {
    name: String,
    #[serde(rename = "numberOfCores")]
    number_of_cores: u32,
    #[serde(rename = "memoryInMB")]
    memory_in_mb: u32,
}

#[derive(Serialize)]
struct StorageSku {
    name: &'static str,
}

#[derive(Serialize)]
struct StorageAccountBody {
    location: String,
    sku: StorageSku,
    kind: &'static str,
}

impl AzureProvider {
    fn management_base(&self) -> &str {
        self.config.management_endpoint.trim_end_matches('/')
    }

    fn resource_group_url(&self, scope: &Scope, name: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourcegroups/{}?api-version={}",
            self.management_base(),
            scope.subscription_id,
            name,
            RESOURCE_GROUP_API_VERSION
        )
    }

    fn provider_resource_url(
        &self,
        scope: &Scope,
        resource_group: &str,
        provider_path: &str,
        name: &str,
        api_version: &str,
    ) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/{}/{}?api-version={}",
            self.management_base(),
            scope.subscription_id,
            resource_group,
            provider_path,
            name,
            api_version
        )
    }

    /// Issues a GET against the management plane, mapping 404 to `None`.
    pub(in crate::azure) async fn get_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &str,
    ) -> Result<Option<T>, AzureProviderError> {
        let token = self.bearer(&self.config.management_endpoint).await?;
        let response = HTTP_CLIENT
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;
        if !status.is_success() {
            return Err(AzureProviderError::Api {
                status: status.as_u16(),
                operation: operation.to_owned(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed = serde_json::from_slice(&body).map_err(|err| AzureProviderError::Decode {
            operation: operation.to_owned(),
            message: err.to_string(),
        })?;
        Ok(Some(parsed))
    }

    /// Issues a creating PUT against the management plane. The body of a
    /// successful response is ignored: the management API answers 200, 201,
    /// or 202 depending on the resource type, and the resource identifier is
    /// deterministic from the request path. A 202 means the provider
    /// accepted the request and finishes provisioning in the background, so
    /// a freshly created resource may not be ready the instant this
    /// returns.
    pub(in crate::azure) async fn put_resource<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        kind: &str,
        name: &str,
    ) -> Result<(), AzureProviderError> {
        let token = self.bearer(&self.config.management_endpoint).await?;
        let response = HTTP_CLIENT
            .put(url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .bytes()
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|err| err.to_string());
        Err(AzureProviderError::CreateFailed {
            kind: kind.to_owned(),
            name: name.to_owned(),
            message: format!("{status}: {message}"),
        })
    }

    async fn lookup_handle(
        &self,
        url: &str,
        operation: &str,
    ) -> Result<Option<ResourceHandle>, AzureProviderError> {
        let found: Option<ResourceDocument> = self.get_optional(url, operation).await?;
        Ok(found.map(|doc| ResourceHandle {
            id: doc.id,
            name: doc.name,
        }))
    }

    pub(in crate::azure) async fn ensure_resource_group_inner(
        &self,
        scope: &Scope,
        spec: &ResourceGroupSpec,
    ) -> Result<EnsureOutcome<ResourceHandle>, AzureProviderError> {
        let url = self.resource_group_url(scope, &spec.name);
        ensure_with(
            || async { self.lookup_handle(&url, "get resource group").await },
            || async {
                let body = json!({ "location": spec.location });
                self.put_resource(&url, &body, "resource group", &spec.name)
                    .await?;
                Ok(ResourceHandle {
                    id: format!(
                        "/subscriptions/{}/resourceGroups/{}",
                        scope.subscription_id, spec.name
                    ),
                    name: spec.name.clone(),
                })
            },
        )
        .await
    }

    pub(in crate::azure) async fn ensure_storage_account_inner(
        &self,
        scope: &Scope,
        spec: &StorageAccountSpec,
    ) -> Result<EnsureOutcome<ResourceHandle>, AzureProviderError> {
        StorageAccountSpec::validate_name(&spec.name)?;
        let url = self.provider_resource_url(
            scope,
            &spec.resource_group,
            "Microsoft.Storage/storageAccounts",
            &spec.name,
            STORAGE_API_VERSION,
        );
        ensure_with(
            || async { self.lookup_handle(&url, "get storage account").await },
            || async {
                let body = StorageAccountBody {
                    location: spec.location.clone(),
                    sku: StorageSku {
                        name: "Standard_LRS",
                    },
                    kind: "StorageV2",
                };
                self.put_resource(&url, &body, "storage account", &spec.name)
                    .await?;
                Ok(ResourceHandle {
                    id: format!(
                        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}",
                        scope.subscription_id, spec.resource_group, spec.name
                    ),
                    name: spec.name.clone(),
                })
            },
        )
        .await
    }

    pub(in crate::azure) async fn ensure_virtual_network_inner(
        &self,
        scope: &Scope,
        spec: &VirtualNetworkSpec,
    ) -> Result<EnsureOutcome<ResourceHandle>, AzureProviderError> {
        let url = self.provider_resource_url(
            scope,
            &spec.resource_group,
            "Microsoft.Network/virtualNetworks",
            &spec.name,
            NETWORK_API_VERSION,
        );
        ensure_with(
            || async { self.lookup_handle(&url, "get virtual network").await },
            || async {
                let body = json!({
                    "location": spec.location,
                    "properties": {
                        "addressSpace": { "addressPrefixes": [spec.address_space] },
                        "subnets": [{
                            "name": spec.subnet_name,
                            "properties": { "addressPrefix": spec.subnet_prefix },
                        }],
                    },
                });
                self.put_resource(&url, &body, "virtual network", &spec.name)
                    .await?;
                Ok(ResourceHandle {
                    id: format!(
                        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}",
                        scope.subscription_id, spec.resource_group, spec.name
                    ),
                    name: spec.name.clone(),
                })
            },
        )
        .await
    }

    pub(in crate::azure) async fn ensure_security_group_inner(
        &self,
        scope: &Scope,
        spec: &SecurityGroupSpec,
    ) -> Result<EnsureOutcome<ResourceHandle>, AzureProviderError> {
        let url = self.provider_resource_url(
            scope,
            &spec.resource_group,
            "Microsoft.Network/networkSecurityGroups",
            &spec.name,
            NETWORK_API_VERSION,
        );
        ensure_with(
            || async { self.lookup_handle(&url, "get security group").await },
            || async {
                let body = json!({ "location": spec.location, "properties": {} });
                self.put_resource(&url, &body, "network security group", &spec.name)
                    .await?;
                Ok(ResourceHandle {
                    id: format!(
                        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
                        scope.subscription_id, spec.resource_group, spec.name
                    ),
                    name: spec.name.clone(),
                })
            },
        )
        .await
    }

    pub(in crate::azure) async fn list_subscriptions_inner(
        &self,
    ) -> Result<Vec<Subscription>, AzureProviderError> {
        let url = format!(
            "{}/subscriptions?api-version={}",
            self.management_base(),
            SUBSCRIPTION_API_VERSION
        );
        let envelope: Option<ValueEnvelope<SubscriptionDocument>> =
            self.get_optional(&url, "list subscriptions").await?;
        Ok(envelope
            .map(|body| body.value)
            .unwrap_or_default()
            .into_iter()
            .map(|doc| Subscription {
                id: doc.subscription_id,
                display_name: doc.display_name,
            })
            .collect())
    }

    pub(in crate::azure) async fn list_locations_inner(
        &self,
        scope: &Scope,
    ) -> Result<Vec<Location>, AzureProviderError> {
        let url = format!(
            "{}/subscriptions/{}/locations?api-version={}",
            self.management_base(),
            scope.subscription_id,
            SUBSCRIPTION_API_VERSION
        );
        let envelope: Option<ValueEnvelope<LocationDocument>> =
            self.get_optional(&url, "list locations").await?;
        Ok(envelope
            .map(|body| body.value)
            .unwrap_or_default()
            .into_iter()
            .map(|doc| Location {
                name: doc.name,
                display_name: doc.display_name,
            })
            .collect())
    }

    pub(in crate::azure) async fn list_vm_sizes_inner(
        &self,
        scope: &Scope,
        location: &str,
    ) -> Result<Vec<VmSize>, AzureProviderError> {
        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Compute/locations/{}/vmSizes?api-version={}",
            self.management_base(),
            scope.subscription_id,
            location,
            COMPUTE_API_VERSION
        );
        let envelope: Option<ValueEnvelope<VmSizeDocument>> =
            self.get_optional(&url, "list VM sizes").await?;
        Ok(envelope
            .map(|body| body.value)
            .unwrap_or_default()
            .into_iter()
            .map(|doc| VmSize {
                name: doc.name,
                cores: doc.number_of_cores,
                memory_mb: doc.memory_in_mb,
            })
            .collect())
    }
}
