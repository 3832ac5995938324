//! OAuth2 client-credentials token acquisition for the Azure provider.

use std::collections::HashMap;

use serde::Deserialize;

use super::{AzureProvider, AzureProviderError, HTTP_CLIENT};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl AzureProvider {
    /// Returns a bearer token for the given audience, fetching one on first
    /// use. Tokens are cached for the lifetime of the provider; a provisioning
    /// run is far shorter than the token validity window.
    pub(crate) async fn bearer(&self, audience: &str) -> Result<String, AzureProviderError> {
        if let Some(token) = self.cached_token(audience) {
            return Ok(token);
        }

        let token = self.fetch_token(audience).await?;
        self.store_token(audience, &token);
        Ok(token)
    }

    fn cached_token(&self, audience: &str) -> Option<String> {
        let tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens.get(audience).cloned()
    }

    fn store_token(&self, audience: &str, token: &str) {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens.insert(audience.to_owned(), token.to_owned());
    }

    async fn fetch_token(&self, audience: &str) -> Result<String, AzureProviderError> {
        let authority = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_endpoint.trim_end_matches('/'),
            self.config.tenant_id
        );
        let scope = format!("{}/.default", audience.trim_end_matches('/'));
        let form: HashMap<&str, &str> = HashMap::from([
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", scope.as_str()),
        ]);

        let response = HTTP_CLIENT
            .post(&authority)
            .form(&form)
            .send()
            .await
            .map_err(|err| AzureProviderError::Auth {
                authority: authority.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| AzureProviderError::Auth {
                authority: authority.clone(),
                message: err.to_string(),
            })?;

        if !status.is_success() {
            return Err(AzureProviderError::Auth {
                authority,
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|err| AzureProviderError::Auth {
                authority,
                message: format!("token response was not valid JSON: {err}"),
            })?;
        Ok(parsed.access_token)
    }
}
