//! One-time login links from the identity provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use hotelops_common::config::AppConfig;

use crate::error::DispatchError;

#[async_trait]
pub trait MagicLinkIssuer: Send + Sync {
    /// Mint a one-time sign-in link for `email`; returns the `action_link`.
    async fn generate_magic_link(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<String, DispatchError>;
}

/// Supabase (GoTrue) admin API issuer.
pub struct SupabaseAdminIssuer {
    client: Client,
    auth_url: String,
    service_key: String,
}

#[derive(Debug, Serialize)]
struct GenerateLinkOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_to: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GenerateLinkRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    email: &'a str,
    options: GenerateLinkOptions<'a>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkProperties {
    action_link: Option<String>,
}

/// Older GoTrue versions return the link at top level, newer ones nest it
/// under `properties`.
#[derive(Debug, Deserialize)]
struct GenerateLinkResponse {
    action_link: Option<String>,
    #[serde(default)]
    properties: Option<LinkProperties>,
}

impl GenerateLinkResponse {
    fn into_link(self) -> Option<String> {
        self.action_link
            .or_else(|| self.properties.and_then(|p| p.action_link))
            .filter(|l| !l.is_empty())
    }
}

impl SupabaseAdminIssuer {
    pub fn new(client: Client, project_url: &str, service_key: String) -> Self {
        Self {
            client,
            auth_url: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            service_key,
        }
    }

    pub fn from_config(client: Client, config: &AppConfig) -> Option<Self> {
        match (&config.supabase_url, &config.supabase_service_role_key) {
            (Some(url), Some(key)) => Some(Self::new(client, url, key.clone())),
            _ => None,
        }
    }
}

#[async_trait]
impl MagicLinkIssuer for SupabaseAdminIssuer {
    async fn generate_magic_link(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<String, DispatchError> {
        let request = GenerateLinkRequest {
            kind: "magiclink",
            email,
            options: GenerateLinkOptions { redirect_to },
        };

        let res = self
            .client
            .post(format!("{}/admin/generate_link", self.auth_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DispatchError::Identity(format!(
                "generate_link failed with status {}: {}",
                status, body
            )));
        }

        let parsed: GenerateLinkResponse = res.json().await?;
        parsed
            .into_link()
            .ok_or_else(|| DispatchError::Identity("response has no action_link".to_string()))
    }
}
