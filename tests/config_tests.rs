//! Unit tests for configuration validation.

use cumulus::config::{AzureConfig, BuilderConfig, CiConfig, ConfigError};
use rstest::*;

#[fixture]
fn valid_azure_config() -> AzureConfig {
    AzureConfig {
        tenant_id: String::from("11111111-2222-3333-4444-555555555555"),
        client_id: String::from("66666666-7777-8888-9999-000000000000"),
        client_secret: String::from("example-secret"),
        subscription_id: None,
        location: None,
        vm_size: None,
        resource_group: String::from("cumulus-build"),
        storage_prefix: String::from("cumulusbuild"),
        virtual_network: String::from("cumulus-build-net"),
        subnet: String::from("build-workers"),
        address_space: String::from("10.10.0.0/16"),
        subnet_prefix: String::from("10.10.1.0/24"),
        security_group: String::from("cumulus-build-nsg"),
        management_endpoint: String::from("https://management.azure.com"),
        authority_endpoint: String::from("https://login.microsoftonline.com"),
        graph_endpoint: String::from("https://graph.microsoft.com"),
    }
}

#[fixture]
fn valid_ci_config() -> CiConfig {
    CiConfig {
        endpoint: String::from("https://ci.example.com"),
        api_token: String::from("example-token"),
        build_cloud: String::from("azure-build-cloud"),
        worker_image: String::from("azure-build-worker"),
    }
}

#[fixture]
fn valid_builder_config() -> BuilderConfig {
    BuilderConfig {
        builder_bin: String::from("packer"),
        template: String::from("build-worker.pkr.hcl"),
        manifest: String::from("build-manifest.json"),
    }
}

#[test]
fn config_validation_rejects_missing_secret_with_actionable_error() {
    let cfg = AzureConfig {
        client_secret: String::new(),
        ..valid_azure_config()
    };

    let error = cfg.validate().expect_err("secret is required");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error");
    };
    assert!(
        message.contains("AZURE_CLIENT_SECRET"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("cumulus.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("client_secret"),
        "error should mention TOML key: {message}"
    );
}

/// Verifies that validation produces actionable errors mentioning both the
/// environment variable and configuration file for each required field.
#[test]
fn azure_config_produces_actionable_errors_for_all_fields() {
    fn assert_actionable(
        mut cfg: AzureConfig,
        mutate: impl FnOnce(&mut AzureConfig),
        env_var: &str,
        toml_key: &str,
    ) {
        mutate(&mut cfg);
        let error = cfg.validate().expect_err("validation should fail");
        let message = error.to_string();
        assert!(
            message.contains(env_var),
            "error should mention env var {env_var}: {message}"
        );
        assert!(
            message.contains("cumulus.toml"),
            "error should mention config file: {message}"
        );
        assert!(
            message.contains(toml_key),
            "error should mention TOML key {toml_key}: {message}"
        );
    }

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.tenant_id.clear(),
        "AZURE_TENANT_ID",
        "tenant_id",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.client_id.clear(),
        "AZURE_CLIENT_ID",
        "client_id",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.resource_group.clear(),
        "AZURE_RESOURCE_GROUP",
        "resource_group",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.storage_prefix.clear(),
        "AZURE_STORAGE_PREFIX",
        "storage_prefix",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.virtual_network.clear(),
        "AZURE_VIRTUAL_NETWORK",
        "virtual_network",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.security_group.clear(),
        "AZURE_SECURITY_GROUP",
        "security_group",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.management_endpoint.clear(),
        "AZURE_MANAGEMENT_ENDPOINT",
        "management_endpoint",
    );

    assert_actionable(
        valid_azure_config(),
        |cfg| cfg.authority_endpoint.clear(),
        "AZURE_AUTHORITY_ENDPOINT",
        "authority_endpoint",
    );
}

#[test]
fn whitespace_only_values_are_treated_as_missing() {
    let cfg = AzureConfig {
        tenant_id: String::from("   "),
        ..valid_azure_config()
    };

    let error = cfg.validate().expect_err("blank tenant should fail");
    assert!(matches!(error, ConfigError::MissingField(_)));
}

#[test]
fn valid_azure_config_passes_validation() {
    valid_azure_config()
        .validate()
        .unwrap_or_else(|err| panic!("valid config should validate: {err}"));
}

#[test]
fn ci_config_produces_actionable_errors_for_all_fields() {
    fn assert_actionable(
        mut cfg: CiConfig,
        mutate: impl FnOnce(&mut CiConfig),
        env_var: &str,
        toml_key: &str,
    ) {
        mutate(&mut cfg);
        let error = cfg.validate().expect_err("validation should fail");
        let message = error.to_string();
        assert!(
            message.contains(env_var),
            "error should mention env var {env_var}: {message}"
        );
        assert!(
            message.contains(toml_key),
            "error should mention TOML key {toml_key}: {message}"
        );
    }

    assert_actionable(
        valid_ci_config(),
        |cfg| cfg.endpoint.clear(),
        "CUMULUS_CI_ENDPOINT",
        "endpoint",
    );

    assert_actionable(
        valid_ci_config(),
        |cfg| cfg.api_token.clear(),
        "CUMULUS_CI_API_TOKEN",
        "api_token",
    );

    assert_actionable(
        valid_ci_config(),
        |cfg| cfg.build_cloud.clear(),
        "CUMULUS_CI_BUILD_CLOUD",
        "build_cloud",
    );

    assert_actionable(
        valid_ci_config(),
        |cfg| cfg.worker_image.clear(),
        "CUMULUS_CI_WORKER_IMAGE",
        "worker_image",
    );
}

#[test]
fn builder_config_produces_actionable_errors_for_all_fields() {
    fn assert_actionable(
        mut cfg: BuilderConfig,
        mutate: impl FnOnce(&mut BuilderConfig),
        env_var: &str,
        toml_key: &str,
    ) {
        mutate(&mut cfg);
        let error = cfg.validate().expect_err("validation should fail");
        let message = error.to_string();
        assert!(
            message.contains(env_var),
            "error should mention env var {env_var}: {message}"
        );
        assert!(
            message.contains(toml_key),
            "error should mention TOML key {toml_key}: {message}"
        );
    }

    assert_actionable(
        valid_builder_config(),
        |cfg| cfg.builder_bin.clear(),
        "CUMULUS_BUILDER_BUILDER_BIN",
        "builder_bin",
    );

    assert_actionable(
        valid_builder_config(),
        |cfg| cfg.template.clear(),
        "CUMULUS_BUILDER_TEMPLATE",
        "template",
    );

    assert_actionable(
        valid_builder_config(),
        |cfg| cfg.manifest.clear(),
        "CUMULUS_BUILDER_MANIFEST",
        "manifest",
    );
}
