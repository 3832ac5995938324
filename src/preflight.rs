//! Fail-fast validation run before the pipeline mutates anything.
//!
//! Bad credentials, an unreachable CI service, or a missing builder binary
//! abort here, before any remote resource is touched.

use thiserror::Error;

use crate::builder::{BuilderError, CommandRunner, ImageBuilder};
use crate::provider::CloudProvider;
use crate::registry::Registry;

/// Errors raised by preflight checks.
#[derive(Debug, Error)]
pub enum PreflightError<PE, GE>
where
    PE: std::error::Error + 'static,
    GE: std::error::Error + 'static,
{
    /// Raised when the CI service is unreachable or rejects the token.
    #[error("CI service check failed: {0}")]
    Ci(#[source] GE),
    /// Raised when provider credentials cannot obtain a token.
    #[error("cloud credential check failed: {0}")]
    Credentials(#[source] PE),
    /// Raised when the image builder binary is absent or broken.
    #[error("image builder check failed: {0}")]
    Builder(#[source] BuilderError),
}

/// Runs the preflight checks in order: CI service, provider credentials,
/// then the builder binary. The builder probe is skipped when the run will
/// use a pre-existing image.
///
/// # Errors
///
/// Returns [`PreflightError`] naming the first check that failed.
pub async fn run_preflight<P, G, R>(
    provider: &P,
    registry: &G,
    builder: Option<&ImageBuilder<R>>,
) -> Result<(), PreflightError<P::Error, G::Error>>
where
    P: CloudProvider,
    G: Registry,
    R: CommandRunner,
{
    registry
        .check_service()
        .await
        .map_err(PreflightError::Ci)?;
    provider
        .verify_credentials()
        .await
        .map_err(PreflightError::Credentials)?;
    if let Some(image_builder) = builder {
        image_builder.probe().map_err(PreflightError::Builder)?;
    }
    Ok(())
}
