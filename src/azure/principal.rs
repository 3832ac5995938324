//! Service principal lookup and creation against the directory API.

use serde::{Deserialize, Serialize};

use crate::provider::{EnsureOutcome, ResourceHandle, ensure_with};

use super::{AzureProvider, AzureProviderError, HTTP_CLIENT};

#[derive(Deserialize)]
struct PrincipalDocument {
    id: String,
    #[serde(rename = "appDisplayName")]
    app_display_name: Option<String>,
}

#[derive(Deserialize)]
struct PrincipalList {
    value: Vec<PrincipalDocument>,
}

#[derive(Serialize)]
struct CreatePrincipalBody<'a> {
    #[serde(rename = "appId")]
    app_id: &'a str,
}

impl AzureProvider {
    fn graph_base(&self) -> &str {
        self.config.graph_endpoint.trim_end_matches('/')
    }

    pub(in crate::azure) async fn ensure_service_principal_inner(
        &self,
    ) -> Result<EnsureOutcome<ResourceHandle>, AzureProviderError> {
        ensure_with(
            || async { self.find_principal().await },
            || async { self.create_principal().await },
        )
        .await
    }

    async fn find_principal(&self) -> Result<Option<ResourceHandle>, AzureProviderError> {
        let url = format!(
            "{}/v1.0/servicePrincipals?$filter=appId eq '{}'",
            self.graph_base(),
            self.config.client_id
        );
        let token = self.bearer(&self.config.graph_endpoint).await?;
        let response = HTTP_CLIENT
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;
        if !status.is_success() {
            return Err(AzureProviderError::Api {
                status: status.as_u16(),
                operation: "find service principal".to_owned(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: PrincipalList =
            serde_json::from_slice(&body).map_err(|err| AzureProviderError::Decode {
                operation: "find service principal".to_owned(),
                message: err.to_string(),
            })?;
        Ok(parsed
            .value
            .into_iter()
            .next()
            .map(|doc| Self::principal_handle(&doc, &self.config.client_id)))
    }

    async fn create_principal(&self) -> Result<ResourceHandle, AzureProviderError> {
        let url = format!("{}/v1.0/servicePrincipals", self.graph_base());
        let token = self.bearer(&self.config.graph_endpoint).await?;
        let payload = CreatePrincipalBody {
            app_id: &self.config.client_id,
        };
        let response = HTTP_CLIENT
            .post(&url)
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| AzureProviderError::transport(&err))?;
        if !status.is_success() {
            return Err(AzureProviderError::CreateFailed {
                kind: "service principal".to_owned(),
                name: self.config.client_id.clone(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: PrincipalDocument =
            serde_json::from_slice(&body).map_err(|err| AzureProviderError::Decode {
                operation: "create service principal".to_owned(),
                message: err.to_string(),
            })?;
        Ok(Self::principal_handle(&parsed, &self.config.client_id))
    }

    fn principal_handle(doc: &PrincipalDocument, client_id: &str) -> ResourceHandle {
        ResourceHandle {
            id: doc.id.clone(),
            name: doc
                .app_display_name
                .clone()
                .unwrap_or_else(|| client_id.to_owned()),
        }
    }
}
