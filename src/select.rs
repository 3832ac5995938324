//! Subscription, region, and VM size resolution.
//!
//! Each value comes from configuration when present. When absent, the
//! available options are fetched from the provider and offered through a
//! [`Prompter`]; non-interactive runs fail instead of prompting so scripted
//! invocations never block on stdin.

use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::config::AzureConfig;
use crate::provider::{CloudProvider, Scope, SpecError};

/// Errors raised while prompting the operator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PromptError {
    /// Raised when the terminal cannot be read or written.
    #[error("prompt I/O failed: {0}")]
    Io(String),
    /// Raised when the answer is not a number within the offered range.
    #[error("invalid choice '{0}': enter a number from the list")]
    InvalidChoice(String),
}

/// Interactive choice among a list of options.
pub trait Prompter {
    /// Presents `options` under `heading` and returns the chosen index.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError`] when input cannot be read or is out of range.
    fn choose(&self, heading: &str, options: &[String]) -> Result<usize, PromptError>;
}

/// Prompter that writes to stderr and reads the answer from stdin.
#[derive(Clone, Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn choose(&self, heading: &str, options: &[String]) -> Result<usize, PromptError> {
        let mut stderr = io::stderr();
        writeln!(stderr, "{heading}").map_err(|err| PromptError::Io(err.to_string()))?;
        for (index, option) in options.iter().enumerate() {
            writeln!(stderr, "  {}) {option}", index + 1)
                .map_err(|err| PromptError::Io(err.to_string()))?;
        }
        write!(stderr, "> ").map_err(|err| PromptError::Io(err.to_string()))?;
        stderr
            .flush()
            .map_err(|err| PromptError::Io(err.to_string()))?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(|err| PromptError::Io(err.to_string()))?;
        parse_choice(&answer, options.len())
    }
}

fn parse_choice(answer: &str, option_count: usize) -> Result<usize, PromptError> {
    let trimmed = answer.trim();
    let number: usize = trimmed
        .parse()
        .map_err(|_| PromptError::InvalidChoice(trimmed.to_owned()))?;
    if number == 0 || number > option_count {
        return Err(PromptError::InvalidChoice(trimmed.to_owned()));
    }
    Ok(number - 1)
}

/// Fully resolved placement for a provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    /// Subscription scope for all management calls.
    pub scope: Scope,
    /// Region to provision into.
    pub location: String,
    /// VM size registered with the build cloud.
    pub vm_size: String,
}

/// Errors raised while resolving the placement.
#[derive(Debug, Error)]
pub enum SelectError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when listing options from the provider fails.
    #[error("failed to list {what}: {source}")]
    Provider {
        /// Option kind being listed.
        what: &'static str,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when the provider offers no options to choose from.
    #[error("no {what} available to the authenticated principal")]
    NoOptions {
        /// Option kind that came back empty.
        what: &'static str,
    },
    /// Raised when a value is unset and prompting is disabled.
    #[error("{what} is not configured and --non-interactive was given")]
    NonInteractive {
        /// Value that would have required a prompt.
        what: &'static str,
    },
    /// Raised when prompting fails.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// Raised when a resolved value fails spec validation.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Resolves subscription, location, and VM size from configuration or by
/// prompting against provider-listed options.
///
/// # Errors
///
/// Returns [`SelectError`] when listing, prompting, or validation fails.
pub async fn resolve_selection<P, T>(
    provider: &P,
    prompter: &T,
    config: &AzureConfig,
    interactive: bool,
) -> Result<Selection, SelectError<P::Error>>
where
    P: CloudProvider,
    T: Prompter,
{
    let scope = resolve_scope(provider, prompter, config, interactive).await?;
    let location = resolve_location(provider, prompter, config, &scope, interactive).await?;
    let vm_size = resolve_vm_size(provider, prompter, config, &scope, &location, interactive).await?;
    Ok(Selection {
        scope,
        location,
        vm_size,
    })
}

fn configured(value: Option<&String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|trimmed| !trimmed.is_empty())
}

async fn resolve_scope<P, T>(
    provider: &P,
    prompter: &T,
    config: &AzureConfig,
    interactive: bool,
) -> Result<Scope, SelectError<P::Error>>
where
    P: CloudProvider,
    T: Prompter,
{
    if let Some(id) = configured(config.subscription_id.as_ref()) {
        return Ok(Scope::new(id)?);
    }
    if !interactive {
        return Err(SelectError::NonInteractive {
            what: "subscription",
        });
    }

    let subscriptions =
        provider
            .list_subscriptions()
            .await
            .map_err(|source| SelectError::Provider {
                what: "subscriptions",
                source,
            })?;
    if subscriptions.is_empty() {
        return Err(SelectError::NoOptions {
            what: "subscriptions",
        });
    }

    let options: Vec<String> = subscriptions
        .iter()
        .map(|sub| format!("{} ({})", sub.display_name, sub.id))
        .collect();
    let index = prompter.choose("Select a subscription:", &options)?;
    let chosen = subscriptions
        .into_iter()
        .nth(index)
        .ok_or(SelectError::NoOptions {
            what: "subscriptions",
        })?;
    Ok(Scope::new(chosen.id)?)
}

async fn resolve_location<P, T>(
    provider: &P,
    prompter: &T,
    config: &AzureConfig,
    scope: &Scope,
    interactive: bool,
) -> Result<String, SelectError<P::Error>>
where
    P: CloudProvider,
    T: Prompter,
{
    if let Some(location) = configured(config.location.as_ref()) {
        return Ok(location);
    }
    if !interactive {
        return Err(SelectError::NonInteractive { what: "location" });
    }

    let locations = provider
        .list_locations(scope)
        .await
        .map_err(|source| SelectError::Provider {
            what: "locations",
            source,
        })?;
    if locations.is_empty() {
        return Err(SelectError::NoOptions { what: "locations" });
    }

    let options: Vec<String> = locations
        .iter()
        .map(|loc| format!("{} ({})", loc.display_name, loc.name))
        .collect();
    let index = prompter.choose("Select a region:", &options)?;
    let chosen = locations
        .into_iter()
        .nth(index)
        .ok_or(SelectError::NoOptions { what: "locations" })?;
    Ok(chosen.name)
}

async fn resolve_vm_size<P, T>(
    provider: &P,
    prompter: &T,
    config: &AzureConfig,
    scope: &Scope,
    location: &str,
    interactive: bool,
) -> Result<String, SelectError<P::Error>>
where
    P: CloudProvider,
    T: Prompter,
{
    if let Some(size) = configured(config.vm_size.as_ref()) {
        return Ok(size);
    }
    if !interactive {
        return Err(SelectError::NonInteractive { what: "VM size" });
    }

    let sizes = provider
        .list_vm_sizes(scope, location)
        .await
        .map_err(|source| SelectError::Provider {
            what: "VM sizes",
            source,
        })?;
    if sizes.is_empty() {
        return Err(SelectError::NoOptions { what: "VM sizes" });
    }

    let options: Vec<String> = sizes
        .iter()
        .map(|size| format!("{} ({} cores, {} MB)", size.name, size.cores, size.memory_mb))
        .collect();
    let index = prompter.choose("Select a VM size:", &options)?;
    let chosen = sizes
        .into_iter()
        .nth(index)
        .ok_or(SelectError::NoOptions { what: "VM sizes" })?;
    Ok(chosen.name)
}
