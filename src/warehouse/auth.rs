//! Credentials for the BigQuery client.
//!
//! An explicit bearer token wins: `warehouse.access_token` from the settings
//! file, then `GOOGLE_OAUTH_ACCESS_TOKEN`. Otherwise Application Default
//! Credentials are used, in `gcp_auth` order: a service-account key named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud ADC file, the GCE metadata
//! server, then the gcloud CLI.

use gcp_auth::TokenProvider;
use snafu::prelude::*;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AccessTokenSnafu, CredentialDiscoverySnafu, WarehouseError};

/// Environment variable holding a ready-made OAuth access token.
pub const TOKEN_ENV_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// OAuth scope requested from the default credentials.
pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

#[derive(Clone)]
pub enum Credentials {
    /// Fixed bearer token.
    Static(String),
    /// Application Default Credentials. The provider caches and refreshes tokens.
    Default(Arc<dyn TokenProvider>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Static(_) => f.write_str("Credentials::Static(..)"),
            Credentials::Default(_) => f.write_str("Credentials::Default"),
        }
    }
}

impl Credentials {
    /// Pick credentials from the configured token, the environment (through
    /// `lookup`), or Application Default Credentials.
    pub async fn discover<F>(configured: Option<&str>, lookup: F) -> Result<Self, WarehouseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = explicit_token(configured, lookup) {
            debug!("Using explicit access token");
            return Ok(Credentials::Static(token));
        }

        debug!("Looking up Application Default Credentials");
        let provider = gcp_auth::provider()
            .await
            .context(CredentialDiscoverySnafu)?;
        Ok(Credentials::Default(provider))
    }

    /// Bearer token for the next request.
    pub async fn access_token(&self) -> Result<String, WarehouseError> {
        match self {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Default(provider) => {
                let token = provider
                    .token(&[BIGQUERY_SCOPE])
                    .await
                    .context(AccessTokenSnafu)?;
                Ok(token.as_str().to_string())
            }
        }
    }

    /// Project the credentials belong to, when they carry one.
    pub async fn project_id(&self) -> Option<String> {
        match self {
            Credentials::Static(_) => None,
            Credentials::Default(provider) => match provider.project_id().await {
                Ok(project) => Some(project.to_string()),
                Err(e) => {
                    debug!(error = %e, "Default credentials do not name a project");
                    None
                }
            },
        }
    }
}

fn explicit_token<F>(configured: Option<&str>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |token: &str| {
        let token = token.trim();
        (!token.is_empty()).then(|| token.to_string())
    };

    configured
        .and_then(non_empty)
        .or_else(|| lookup(TOKEN_ENV_VAR).as_deref().and_then(non_empty))
}
