//! Social Login Providers
//!
//! Provider adapters behind a common trait: each adapter exchanges an
//! authorization code for an access token, fetches the provider profile, and
//! knows how to extract a display name and avatar from that profile.

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, AuthorizationCode, ClientId,
    ClientSecret, RedirectUrl, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProviderCredentials;
use crate::models::SocialProfile;

/// Errors surfaced by provider adapters
#[derive(Error, Debug)]
pub enum SocialProviderError {
    /// Code exchange with the provider failed
    #[error("Code exchange failed: {0}")]
    Exchange(String),

    /// Profile fetch failed or returned an unusable payload
    #[error("Profile fetch failed: {0}")]
    Profile(String),

    /// Provider did not report an email address
    #[error("Provider did not supply an email address")]
    MissingEmail,

    /// Requested provider is not configured
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// A social identity provider that can complete an authorization-code login
#[async_trait]
pub trait SocialProvider: Send + Sync {
    /// Stable provider identifier used in URLs and linked_accounts rows
    fn id(&self) -> &'static str;

    /// Exchange an authorization code for the user's profile
    async fn exchange_code(&self, code: &str) -> Result<SocialProfile, SocialProviderError>;

    /// Best display name this provider's profile can offer
    fn display_name(&self, profile: &SocialProfile) -> Option<String> {
        match (&profile.name, &profile.given_name, &profile.family_name) {
            (Some(name), _, _) if !name.trim().is_empty() => Some(name.trim().to_string()),
            (_, Some(given), Some(family)) => Some(format!("{} {}", given.trim(), family.trim())),
            (_, Some(given), None) => Some(given.trim().to_string()),
            _ => None,
        }
    }

    /// Avatar URL from the provider profile, when present
    fn avatar_url(&self, profile: &SocialProfile) -> Option<String> {
        profile.avatar_url.clone()
    }
}

fn build_oauth_client(
    credentials: &ProviderCredentials,
    auth_url: &str,
    token_url: &str,
) -> Result<BasicClient, SocialProviderError> {
    let auth_url = AuthUrl::new(auth_url.to_string())
        .map_err(|e| SocialProviderError::Exchange(e.to_string()))?;
    let token_url = TokenUrl::new(token_url.to_string())
        .map_err(|e| SocialProviderError::Exchange(e.to_string()))?;
    let redirect_url = RedirectUrl::new(credentials.redirect_uri.clone())
        .map_err(|e| SocialProviderError::Exchange(e.to_string()))?;

    Ok(BasicClient::new(
        ClientId::new(credentials.client_id.clone()),
        Some(ClientSecret::new(credentials.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(redirect_url))
}

/// Google OAuth 2.0 provider
pub struct GoogleProvider {
    oauth_client: BasicClient,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

impl GoogleProvider {
    pub fn new(credentials: &ProviderCredentials) -> Result<Self, SocialProviderError> {
        Ok(Self {
            oauth_client: build_oauth_client(
                credentials,
                "https://accounts.google.com/o/oauth2/v2/auth",
                "https://www.googleapis.com/oauth2/v3/token",
            )?,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl SocialProvider for GoogleProvider {
    fn id(&self) -> &'static str {
        "google"
    }

    async fn exchange_code(&self, code: &str) -> Result<SocialProfile, SocialProviderError> {
        let token = self
            .oauth_client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| SocialProviderError::Exchange(e.to_string()))?;

        let info: GoogleUserInfo = self
            .http
            .get("https://www.googleapis.com/oauth2/v2/userinfo")
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .map_err(|e| SocialProviderError::Profile(e.to_string()))?
            .json()
            .await
            .map_err(|e| SocialProviderError::Profile(e.to_string()))?;

        let email = info.email.ok_or(SocialProviderError::MissingEmail)?;

        Ok(SocialProfile {
            provider_user_id: info.id,
            email,
            name: info.name,
            given_name: info.given_name,
            family_name: info.family_name,
            avatar_url: info.picture,
        })
    }
}

/// Facebook OAuth 2.0 provider
pub struct FacebookProvider {
    oauth_client: BasicClient,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FacebookUserInfo {
    id: String,
    email: Option<String>,
    name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    picture: Option<FacebookPicture>,
}

#[derive(Debug, Deserialize)]
struct FacebookPicture {
    data: Option<FacebookPictureData>,
}

#[derive(Debug, Deserialize)]
struct FacebookPictureData {
    url: Option<String>,
}

impl FacebookProvider {
    pub fn new(credentials: &ProviderCredentials) -> Result<Self, SocialProviderError> {
        Ok(Self {
            oauth_client: build_oauth_client(
                credentials,
                "https://www.facebook.com/v18.0/dialog/oauth",
                "https://graph.facebook.com/v18.0/oauth/access_token",
            )?,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl SocialProvider for FacebookProvider {
    fn id(&self) -> &'static str {
        "facebook"
    }

    async fn exchange_code(&self, code: &str) -> Result<SocialProfile, SocialProviderError> {
        let token = self
            .oauth_client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| SocialProviderError::Exchange(e.to_string()))?;

        let info: FacebookUserInfo = self
            .http
            .get("https://graph.facebook.com/me")
            .query(&[
                ("fields", "id,name,email,first_name,last_name,picture"),
                ("access_token", token.access_token().secret()),
            ])
            .send()
            .await
            .map_err(|e| SocialProviderError::Profile(e.to_string()))?
            .json()
            .await
            .map_err(|e| SocialProviderError::Profile(e.to_string()))?;

        let email = info.email.ok_or(SocialProviderError::MissingEmail)?;

        Ok(SocialProfile {
            provider_user_id: info.id,
            email,
            name: info.name,
            given_name: info.first_name,
            family_name: info.last_name,
            avatar_url: info
                .picture
                .and_then(|p| p.data)
                .and_then(|d| d.url),
        })
    }
}

/// Registry of configured providers, keyed by provider id
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn SocialProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn SocialProvider>) -> Self {
        self.providers.insert(provider.id(), provider);
        self
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn SocialProvider>, SocialProviderError> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| SocialProviderError::UnknownProvider(provider_id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Provider double returning a fixed profile without any network calls
    pub struct StubProvider {
        pub provider_id: &'static str,
        pub profile: SocialProfile,
        pub fail: bool,
    }

    impl StubProvider {
        pub fn returning(provider_id: &'static str, profile: SocialProfile) -> Self {
            Self {
                provider_id,
                profile,
                fail: false,
            }
        }

        pub fn failing(provider_id: &'static str) -> Self {
            Self {
                provider_id,
                profile: SocialProfile {
                    provider_user_id: String::new(),
                    email: String::new(),
                    name: None,
                    given_name: None,
                    family_name: None,
                    avatar_url: None,
                },
                fail: true,
            }
        }
    }

    #[async_trait]
    impl SocialProvider for StubProvider {
        fn id(&self) -> &'static str {
            self.provider_id
        }

        async fn exchange_code(&self, _code: &str) -> Result<SocialProfile, SocialProviderError> {
            if self.fail {
                return Err(SocialProviderError::Exchange(
                    "simulated provider outage".into(),
                ));
            }
            Ok(self.profile.clone())
        }
    }
}
