//! External image builder invocation and manifest parsing.
//!
//! The builder module shells out to the system image-building tool (Packer
//! by default), handing it a template and a set of named build variables.
//! The tool writes a JSON manifest on success; the last recorded build's
//! artifact identifier is the resulting VM image reference.

use std::ffi::OsString;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::config::BuilderConfig;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BuilderError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BuilderError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| BuilderError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A named build variable handed to the builder via `-var`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildVariable {
    /// Variable name as referenced by the template.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl BuildVariable {
    /// Creates a build variable, trimming the name.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_owned(),
            value: value.into(),
        }
    }

    /// Parses a `name=value` pair as accepted on the command line.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidVariable`] when the pair has no `=` or
    /// an empty name.
    pub fn parse(pair: &str) -> Result<Self, BuilderError> {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(BuilderError::InvalidVariable {
                pair: pair.to_owned(),
            });
        };
        if name.trim().is_empty() {
            return Err(BuilderError::InvalidVariable {
                pair: pair.to_owned(),
            });
        }
        Ok(Self::new(name, value))
    }

    fn render(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Reference to a built VM image, as recorded in the builder manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageArtifact {
    /// Provider-side image location or identifier.
    pub image_uri: String,
}

#[derive(Deserialize)]
struct Manifest {
    builds: Vec<ManifestBuild>,
}

#[derive(Deserialize)]
struct ManifestBuild {
    artifact_id: String,
}

/// Errors surfaced while building an image.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BuilderError {
    /// Raised when configuration is missing required values.
    #[error("invalid builder configuration: {0}")]
    InvalidConfig(String),
    /// Raised when a `name=value` variable pair cannot be parsed.
    #[error("invalid build variable '{pair}': expected name=value")]
    InvalidVariable {
        /// The pair as supplied.
        pair: String,
    },
    /// Raised when the template file does not exist.
    #[error("builder template missing: {path}")]
    MissingTemplate {
        /// Path that was expected to hold the template.
        path: Utf8PathBuf,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the builder completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    BuildFailed {
        /// Builder binary used for the attempted build.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the manifest file cannot be read after a build.
    #[error("failed to read builder manifest {path}: {message}")]
    ManifestRead {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the manifest cannot be parsed or holds no builds.
    #[error("builder manifest {path} holds no usable build record: {message}")]
    ManifestInvalid {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Parser error or constraint that failed.
        message: String,
    },
}

/// Invokes the external image builder and extracts the resulting image.
#[derive(Debug)]
pub struct ImageBuilder<R: CommandRunner> {
    config: BuilderConfig,
    runner: R,
}

impl ImageBuilder<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: BuilderConfig) -> Result<Self, BuilderError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> ImageBuilder<R> {
    /// Creates a new builder using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: BuilderConfig, runner: R) -> Result<Self, BuilderError> {
        config
            .validate()
            .map_err(|err| BuilderError::InvalidConfig(err.to_string()))?;
        Ok(Self { config, runner })
    }

    /// Read access to the validated configuration.
    #[must_use]
    pub const fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Probes the builder binary by asking it for its version.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Spawn`] when the binary is absent, or
    /// [`BuilderError::BuildFailed`] when the probe exits non-zero.
    pub fn probe(&self) -> Result<(), BuilderError> {
        let output = self
            .runner
            .run(&self.config.builder_bin, &[OsString::from("version")])?;
        if output.is_success() {
            return Ok(());
        }
        Err(Self::failure(&self.config.builder_bin, &output))
    }

    /// Runs a build with the given variables and returns the image recorded
    /// in the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::MissingTemplate`] when the template is absent,
    /// [`BuilderError::BuildFailed`] when the builder exits non-zero, or a
    /// manifest error when the result cannot be recovered.
    pub fn build(&self, variables: &[BuildVariable]) -> Result<ImageArtifact, BuilderError> {
        let template = Utf8Path::new(&self.config.template);
        if !template.is_file() {
            return Err(BuilderError::MissingTemplate {
                path: template.to_path_buf(),
            });
        }

        let args = Self::build_args(variables, template);
        let output = self.runner.run(&self.config.builder_bin, &args)?;
        if !output.is_success() {
            return Err(Self::failure(&self.config.builder_bin, &output));
        }

        self.read_manifest()
    }

    fn build_args(variables: &[BuildVariable], template: &Utf8Path) -> Vec<OsString> {
        let mut args = vec![OsString::from("build")];
        for variable in variables {
            args.push(OsString::from("-var"));
            args.push(OsString::from(variable.render()));
        }
        args.push(OsString::from(template.as_str()));
        args
    }

    fn failure(program: &str, output: &CommandOutput) -> BuilderError {
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        BuilderError::BuildFailed {
            program: program.to_owned(),
            status_text,
            stderr: output.stderr.clone(),
        }
    }

    fn read_manifest(&self) -> Result<ImageArtifact, BuilderError> {
        let path = Utf8PathBuf::from(&self.config.manifest);
        let raw = std::fs::read(&path).map_err(|err| BuilderError::ManifestRead {
            path: path.clone(),
            message: err.to_string(),
        })?;
        parse_manifest(&raw, &path)
    }
}

/// Extracts the newest build's artifact from raw manifest bytes.
///
/// The builder appends one record per run; the final entry reflects the
/// image produced by the invocation that just finished.
///
/// # Errors
///
/// Returns [`BuilderError::ManifestInvalid`] when the JSON cannot be parsed
/// or contains no build records.
pub fn parse_manifest(raw: &[u8], path: &Utf8Path) -> Result<ImageArtifact, BuilderError> {
    let manifest: Manifest =
        serde_json::from_slice(raw).map_err(|err| BuilderError::ManifestInvalid {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

    let last = manifest
        .builds
        .into_iter()
        .next_back()
        .ok_or_else(|| BuilderError::ManifestInvalid {
            path: path.to_path_buf(),
            message: String::from("builds array is empty"),
        })?;

    if last.artifact_id.trim().is_empty() {
        return Err(BuilderError::ManifestInvalid {
            path: path.to_path_buf(),
            message: String::from("artifact_id is empty"),
        });
    }

    Ok(ImageArtifact {
        image_uri: last.artifact_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_variable_parses_name_value_pairs() {
        let variable = BuildVariable::parse("resource_group=cumulus-build").unwrap();
        assert_eq!(variable.name, "resource_group");
        assert_eq!(variable.value, "cumulus-build");
    }

    #[test]
    fn build_variable_keeps_equals_in_value() {
        let variable = BuildVariable::parse("extra=a=b").unwrap();
        assert_eq!(variable.value, "a=b");
    }

    #[test]
    fn build_variable_rejects_missing_separator() {
        assert!(matches!(
            BuildVariable::parse("no-separator"),
            Err(BuilderError::InvalidVariable { .. })
        ));
    }

    #[test]
    fn build_variable_rejects_empty_name() {
        assert!(matches!(
            BuildVariable::parse("=value"),
            Err(BuilderError::InvalidVariable { .. })
        ));
    }

    #[test]
    fn parse_manifest_takes_last_build() {
        let raw = br#"{
            "builds": [
                {"artifact_id": "old-image"},
                {"artifact_id": "https://store.example/images/worker.vhd"}
            ]
        }"#;
        let artifact = parse_manifest(raw, Utf8Path::new("manifest.json")).unwrap();
        assert_eq!(artifact.image_uri, "https://store.example/images/worker.vhd");
    }

    #[test]
    fn parse_manifest_rejects_empty_builds() {
        let err = parse_manifest(br#"{"builds": []}"#, Utf8Path::new("manifest.json")).unwrap_err();
        assert!(
            matches!(err, BuilderError::ManifestInvalid { ref message, .. } if message.contains("empty"))
        );
    }

    #[test]
    fn parse_manifest_rejects_blank_artifact() {
        let err = parse_manifest(
            br#"{"builds": [{"artifact_id": "  "}]}"#,
            Utf8Path::new("manifest.json"),
        )
        .unwrap_err();
        assert!(matches!(err, BuilderError::ManifestInvalid { .. }));
    }

    #[test]
    fn parse_manifest_rejects_malformed_json() {
        let err = parse_manifest(b"not json", Utf8Path::new("manifest.json")).unwrap_err();
        assert!(matches!(err, BuilderError::ManifestInvalid { .. }));
    }
}
