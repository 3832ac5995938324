//! Provider-neutral abstractions for ensuring cloud build resources exist.
//!
//! Every provisioning step follows the same get-or-create contract: look the
//! resource up by name, create it when absent, and report whether creation
//! happened. [`ensure_with`] captures that contract once so each provider
//! operation only supplies the lookup and create futures.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Maximum storage account name length accepted by the provider.
pub const STORAGE_NAME_MAX: usize = 24;
/// Minimum storage account name length accepted by the provider.
pub const STORAGE_NAME_MIN: usize = 3;

/// Subscription identifier that scopes all management calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Scope {
    /// Provider subscription identifier.
    pub subscription_id: String,
}

impl Scope {
    /// Creates a scope, trimming the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Empty`] when the identifier is blank.
    pub fn new(subscription_id: impl Into<String>) -> Result<Self, SpecError> {
        let subscription_id = subscription_id.into().trim().to_owned();
        if subscription_id.is_empty() {
            return Err(SpecError::Empty("subscription_id".to_owned()));
        }
        Ok(Self { subscription_id })
    }
}

/// Parameters for ensuring a resource group exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceGroupSpec {
    /// Resource group name.
    pub name: String,
    /// Region the group is anchored to.
    pub location: String,
}

/// Role a storage account plays in the build environment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoragePurpose {
    /// Holds the built VM images.
    Images,
    /// Receives boot diagnostics from build workers.
    BootDiagnostics,
    /// Scratch space for build artifacts.
    Artifacts,
}

impl StoragePurpose {
    /// Short suffix appended to the account name prefix.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Images => "img",
            Self::BootDiagnostics => "diag",
            Self::Artifacts => "art",
        }
    }

    /// All purposes in the order the pipeline provisions them.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Images, Self::BootDiagnostics, Self::Artifacts]
    }
}

/// Parameters for ensuring a storage account exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageAccountSpec {
    /// Globally unique account name (3-24 lowercase alphanumerics).
    pub name: String,
    /// Resource group that owns the account.
    pub resource_group: String,
    /// Region for the account.
    pub location: String,
    /// Role the account plays in the build environment.
    pub purpose: StoragePurpose,
}

impl StorageAccountSpec {
    /// Builds a spec from a name prefix and purpose, validating the derived
    /// name against the provider's constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::StorageName`] when the derived name is outside
    /// the 3-24 character bound or contains anything other than lowercase
    /// alphanumerics.
    pub fn derive(
        prefix: &str,
        purpose: StoragePurpose,
        resource_group: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self, SpecError> {
        let name = format!("{}{}", prefix.trim(), purpose.suffix());
        Self::validate_name(&name)?;
        Ok(Self {
            name,
            resource_group: resource_group.into(),
            location: location.into(),
            purpose,
        })
    }

    /// Checks a storage account name against the provider's constraints.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::StorageName`] describing the violated constraint.
    pub fn validate_name(name: &str) -> Result<(), SpecError> {
        if name.len() < STORAGE_NAME_MIN || name.len() > STORAGE_NAME_MAX {
            return Err(SpecError::StorageName {
                name: name.to_owned(),
                reason: format!(
                    "length must be {STORAGE_NAME_MIN}-{STORAGE_NAME_MAX} characters"
                ),
            });
        }
        if !name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        {
            return Err(SpecError::StorageName {
                name: name.to_owned(),
                reason: "only lowercase letters and digits are allowed".to_owned(),
            });
        }
        Ok(())
    }
}

/// Parameters for ensuring a virtual network with a single subnet exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VirtualNetworkSpec {
    /// Virtual network name.
    pub name: String,
    /// Name of the build subnet inside the network.
    pub subnet_name: String,
    /// Address space for the network in CIDR notation.
    pub address_space: String,
    /// Address prefix carved out for the subnet.
    pub subnet_prefix: String,
    /// Resource group that owns the network.
    pub resource_group: String,
    /// Region for the network.
    pub location: String,
}

/// Parameters for ensuring a network security group exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityGroupSpec {
    /// Security group name.
    pub name: String,
    /// Resource group that owns the group.
    pub resource_group: String,
    /// Region for the group.
    pub location: String,
}

/// Result of a get-or-create call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnsureOutcome<T> {
    /// The resource, whether found or freshly created.
    pub value: T,
    /// `true` when the call created the resource, `false` when it already
    /// existed.
    pub created: bool,
}

impl<T> EnsureOutcome<T> {
    /// Wraps a resource that already existed.
    pub const fn existing(value: T) -> Self {
        Self {
            value,
            created: false,
        }
    }

    /// Wraps a freshly created resource.
    pub const fn created(value: T) -> Self {
        Self {
            value,
            created: true,
        }
    }
}

/// Identifier handle returned for provisioned management resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceHandle {
    /// Fully qualified provider resource identifier.
    pub id: String,
    /// Resource name as requested.
    pub name: String,
}

/// Subscription visible to the authenticated principal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: String,
    /// Display name shown during interactive selection.
    pub display_name: String,
}

/// Region offered by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    /// Canonical location name (for example `westeurope`).
    pub name: String,
    /// Display name shown during interactive selection.
    pub display_name: String,
}

/// Virtual machine size offered in a location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmSize {
    /// Size name (for example `Standard_D2s_v3`).
    pub name: String,
    /// Number of virtual CPU cores.
    pub cores: u32,
    /// Memory in megabytes.
    pub memory_mb: u32,
}

/// Errors raised while constructing provisioning specs.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when a required field is blank.
    #[error("missing or empty field: {0}")]
    Empty(String),
    /// Raised when a storage account name violates provider constraints.
    #[error("invalid storage account name '{name}': {reason}")]
    StorageName {
        /// The offending name.
        name: String,
        /// Constraint that was violated.
        reason: String,
    },
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Management-plane operations the pipeline needs from a cloud provider.
pub trait CloudProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Verifies the configured credentials can obtain a management token.
    fn verify_credentials(&self) -> ProviderFuture<'_, (), Self::Error>;

    /// Lists subscriptions visible to the authenticated principal.
    fn list_subscriptions(&self) -> ProviderFuture<'_, Vec<Subscription>, Self::Error>;

    /// Lists regions available under the given subscription.
    fn list_locations<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> ProviderFuture<'a, Vec<Location>, Self::Error>;

    /// Lists VM sizes offered in a location.
    fn list_vm_sizes<'a>(
        &'a self,
        scope: &'a Scope,
        location: &'a str,
    ) -> ProviderFuture<'a, Vec<VmSize>, Self::Error>;

    /// Ensures the service principal backing the configured client exists in
    /// the directory.
    fn ensure_service_principal(
        &self,
    ) -> ProviderFuture<'_, EnsureOutcome<ResourceHandle>, Self::Error>;

    /// Ensures the resource group exists.
    fn ensure_resource_group<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a ResourceGroupSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error>;

    /// Ensures a storage account exists.
    ///
    /// Providers may accept the creation and complete it asynchronously; a
    /// freshly created account can still be provisioning when this returns.
    fn ensure_storage_account<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a StorageAccountSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error>;

    /// Ensures the virtual network and its build subnet exist.
    fn ensure_virtual_network<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a VirtualNetworkSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error>;

    /// Ensures the network security group exists.
    fn ensure_security_group<'a>(
        &'a self,
        scope: &'a Scope,
        spec: &'a SecurityGroupSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error>;
}

/// Runs the get-or-create idiom with injected lookup and create futures.
///
/// The lookup runs first; a hit short-circuits creation. Running this twice
/// with the same inputs therefore performs no second creation, which is the
/// idempotency contract every pipeline step relies on.
///
/// # Errors
///
/// Propagates whichever error the lookup or create future produced.
pub async fn ensure_with<T, E, LookupFut, CreateFut, Lookup, Create>(
    lookup: Lookup,
    create: Create,
) -> Result<EnsureOutcome<T>, E>
where
    Lookup: FnOnce() -> LookupFut,
    Create: FnOnce() -> CreateFut,
    LookupFut: Future<Output = Result<Option<T>, E>>,
    CreateFut: Future<Output = Result<T, E>>,
{
    if let Some(found) = lookup().await? {
        return Ok(EnsureOutcome::existing(found));
    }
    let made = create().await?;
    Ok(EnsureOutcome::created(made))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_with_skips_create_on_lookup_hit() {
        let outcome: Result<EnsureOutcome<&str>, SpecError> = ensure_with(
            || async { Ok(Some("present")) },
            || async { panic!("create must not run when lookup hits") },
        )
        .await;

        let outcome = outcome.unwrap();
        assert_eq!(outcome.value, "present");
        assert!(!outcome.created);
    }

    #[tokio::test]
    async fn ensure_with_creates_on_lookup_miss() {
        let outcome: Result<EnsureOutcome<&str>, SpecError> =
            ensure_with(|| async { Ok(None) }, || async { Ok("fresh") }).await;

        let outcome = outcome.unwrap();
        assert_eq!(outcome.value, "fresh");
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn ensure_with_propagates_lookup_errors() {
        let outcome: Result<EnsureOutcome<&str>, SpecError> = ensure_with(
            || async { Err(SpecError::Empty("name".to_owned())) },
            || async { Ok("unused") },
        )
        .await;

        assert!(matches!(outcome, Err(SpecError::Empty(_))));
    }

    #[test]
    fn storage_spec_derives_name_with_purpose_suffix() {
        let spec =
            StorageAccountSpec::derive("acmebuild", StoragePurpose::Images, "rg", "westeurope")
                .unwrap();
        assert_eq!(spec.name, "acmebuildimg");
    }

    #[test]
    fn storage_name_rejects_overlong_names() {
        let err = StorageAccountSpec::validate_name("a".repeat(25).as_str()).unwrap_err();
        assert!(matches!(err, SpecError::StorageName { .. }));
    }

    #[test]
    fn storage_name_rejects_uppercase() {
        let err = StorageAccountSpec::validate_name("AcmeImages").unwrap_err();
        assert!(
            matches!(err, SpecError::StorageName { ref reason, .. } if reason.contains("lowercase"))
        );
    }

    #[test]
    fn storage_name_accepts_valid_names() {
        assert!(StorageAccountSpec::validate_name("acmebuildimg").is_ok());
    }

    #[test]
    fn scope_rejects_blank_subscription() {
        assert!(matches!(Scope::new("  "), Err(SpecError::Empty(_))));
    }
}
