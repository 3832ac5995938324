//! Command-line interface definitions for the `cumulus` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `cumulus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cumulus",
    about = "Provision a cloud build environment and register it with your CI service",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the full provisioning pipeline.
    #[command(
        name = "provision",
        about = "Provision cloud resources, build a worker image, and register both"
    )]
    Provision(ProvisionCommand),
    /// Register a pre-built image with the CI service without provisioning.
    #[command(
        name = "register-image",
        about = "Register an existing VM image as a build worker image"
    )]
    RegisterImage(RegisterImageCommand),
}

/// Arguments for the `cumulus provision` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProvisionCommand {
    /// Subscription to provision into, overriding configuration.
    #[arg(long, value_name = "ID")]
    pub(crate) subscription: Option<String>,
    /// Region to provision into, overriding configuration.
    #[arg(long, value_name = "LOCATION")]
    pub(crate) location: Option<String>,
    /// VM size for build workers, overriding configuration.
    #[arg(long, value_name = "SIZE")]
    pub(crate) vm_size: Option<String>,
    /// Use this pre-existing image instead of invoking the builder.
    #[arg(long, value_name = "URI")]
    pub(crate) image: Option<String>,
    /// Extra build variable passed to the image builder (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub(crate) variables: Vec<String>,
    /// Fail instead of prompting when a value is missing.
    #[arg(long)]
    pub(crate) non_interactive: bool,
}

/// Arguments for the `cumulus register-image` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RegisterImageCommand {
    /// Image location or identifier to register.
    #[arg(long, value_name = "URI", required = true)]
    pub(crate) image: String,
    /// Record name, overriding the configured worker image name.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
}
