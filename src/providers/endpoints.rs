use crate::config::ProviderSettings;
use crate::error::RelayError;
use crate::types::Provider;

use chrono::TimeDelta;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope, basic::BasicClient};
use url::Url;

/// How the OAuth client authenticates itself at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `Authorization: Basic base64(client_id:client_secret)`.
    BasicHeader,
    /// `client_id` and `client_secret` as form fields.
    RequestBody,
}

/// How an access token is presented to the provider's API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiAuth {
    Bearer,
    /// The bare token in `Authorization`.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeStyle {
    SpaceSeparated,
    CommaSeparated,
}

const MONDAY_IDENTITY_QUERY: &str = "query { me { email account { id } } }";

/// Static knowledge about one provider's OAuth and API surface.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub provider: Provider,
    pub auth_url: Url,
    pub token_url: Url,
    pub api_base: Url,
    pub identity_url: Url,
    /// GraphQL document posted to `identity_url` instead of a GET.
    pub identity_query: Option<&'static str>,
    pub scopes: Vec<String>,
    pub scope_style: ScopeStyle,
    pub extra_auth_params: &'static [(&'static str, &'static str)],
    pub client_auth: ClientAuth,
    pub grant_type_on_exchange: bool,
    pub redirect_uri_on_refresh: bool,
    pub api_auth: ApiAuth,
    /// Lifetime assumed when a token response has no `expires_in`.
    pub default_lifetime: Option<TimeDelta>,
    /// Exchange fails when the account identity cannot be resolved.
    pub identity_required: bool,
}

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl ProviderEndpoints {
    pub fn defaults(provider: Provider) -> Result<Self, RelayError> {
        let hour = Some(TimeDelta::seconds(3600));
        let endpoints = match provider {
            Provider::Zoom => Self {
                provider,
                auth_url: Url::parse("https://zoom.us/oauth/authorize")?,
                token_url: Url::parse("https://zoom.us/oauth/token")?,
                api_base: Url::parse("https://api.zoom.us/v2/")?,
                identity_url: Url::parse("https://api.zoom.us/v2/users/me")?,
                identity_query: None,
                scopes: Vec::new(),
                scope_style: ScopeStyle::SpaceSeparated,
                extra_auth_params: &[],
                client_auth: ClientAuth::BasicHeader,
                grant_type_on_exchange: true,
                redirect_uri_on_refresh: false,
                api_auth: ApiAuth::Bearer,
                default_lifetime: hour,
                identity_required: true,
            },
            Provider::Google => Self {
                provider,
                auth_url: Url::parse("https://accounts.google.com/o/oauth2/v2/auth")?,
                token_url: Url::parse("https://oauth2.googleapis.com/token")?,
                api_base: Url::parse("https://www.googleapis.com/calendar/v3/")?,
                identity_url: Url::parse("https://www.googleapis.com/oauth2/v1/userinfo")?,
                identity_query: None,
                scopes: scopes(&[
                    "https://www.googleapis.com/auth/calendar.readonly",
                    "https://www.googleapis.com/auth/userinfo.email",
                    "https://www.googleapis.com/auth/userinfo.profile",
                ]),
                scope_style: ScopeStyle::SpaceSeparated,
                extra_auth_params: &[("access_type", "offline"), ("prompt", "consent")],
                client_auth: ClientAuth::RequestBody,
                grant_type_on_exchange: true,
                redirect_uri_on_refresh: false,
                api_auth: ApiAuth::Bearer,
                default_lifetime: hour,
                identity_required: true,
            },
            Provider::MicrosoftTeams => Self {
                provider,
                auth_url: Url::parse(
                    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                )?,
                token_url: Url::parse("https://login.microsoftonline.com/common/oauth2/v2.0/token")?,
                api_base: Url::parse("https://graph.microsoft.com/v1.0/")?,
                identity_url: Url::parse("https://graph.microsoft.com/v1.0/me")?,
                identity_query: None,
                scopes: scopes(&[
                    "openid",
                    "User.Read",
                    "Calendars.Read",
                    "offline_access",
                    "email",
                ]),
                scope_style: ScopeStyle::SpaceSeparated,
                extra_auth_params: &[("response_mode", "query")],
                client_auth: ClientAuth::RequestBody,
                grant_type_on_exchange: true,
                redirect_uri_on_refresh: true,
                api_auth: ApiAuth::Bearer,
                default_lifetime: hour,
                identity_required: true,
            },
            Provider::Asana => Self {
                provider,
                auth_url: Url::parse("https://app.asana.com/-/oauth_authorize")?,
                token_url: Url::parse("https://app.asana.com/-/oauth_token")?,
                api_base: Url::parse("https://app.asana.com/api/1.0/")?,
                identity_url: Url::parse("https://app.asana.com/api/1.0/users/me")?,
                identity_query: None,
                scopes: Vec::new(),
                scope_style: ScopeStyle::SpaceSeparated,
                extra_auth_params: &[],
                client_auth: ClientAuth::RequestBody,
                grant_type_on_exchange: true,
                redirect_uri_on_refresh: false,
                api_auth: ApiAuth::Bearer,
                default_lifetime: hour,
                identity_required: false,
            },
            Provider::Clickup => Self {
                provider,
                auth_url: Url::parse("https://app.clickup.com/api")?,
                token_url: Url::parse("https://api.clickup.com/api/v2/oauth/token")?,
                api_base: Url::parse("https://api.clickup.com/api/v2/")?,
                identity_url: Url::parse("https://api.clickup.com/api/v2/user")?,
                identity_query: None,
                scopes: Vec::new(),
                scope_style: ScopeStyle::SpaceSeparated,
                extra_auth_params: &[],
                client_auth: ClientAuth::RequestBody,
                grant_type_on_exchange: false,
                redirect_uri_on_refresh: false,
                api_auth: ApiAuth::Bearer,
                // ClickUp tokens carry no expiry metadata.
                default_lifetime: None,
                identity_required: false,
            },
            Provider::Monday => Self {
                provider,
                auth_url: Url::parse("https://auth.monday.com/oauth2/authorize")?,
                token_url: Url::parse("https://auth.monday.com/oauth2/token")?,
                api_base: Url::parse("https://api.monday.com/v2")?,
                identity_url: Url::parse("https://api.monday.com/v2")?,
                identity_query: Some(MONDAY_IDENTITY_QUERY),
                scopes: scopes(&["boards:read", "boards:write", "users:read"]),
                scope_style: ScopeStyle::CommaSeparated,
                extra_auth_params: &[],
                client_auth: ClientAuth::RequestBody,
                grant_type_on_exchange: true,
                redirect_uri_on_refresh: false,
                api_auth: ApiAuth::Raw,
                default_lifetime: hour,
                identity_required: false,
            },
        };
        Ok(endpoints)
    }

    /// Provider defaults with the configured overrides applied.
    pub fn for_settings(provider: Provider, settings: &ProviderSettings) -> Result<Self, RelayError> {
        let mut endpoints = Self::defaults(provider)?;
        if let Some(url) = &settings.auth_url {
            endpoints.auth_url = url.clone();
        }
        if let Some(url) = &settings.token_url {
            endpoints.token_url = url.clone();
        }
        if let Some(url) = &settings.api_base {
            endpoints.api_base = url.clone();
        }
        if let Some(url) = &settings.identity_url {
            endpoints.identity_url = url.clone();
        }
        if let Some(list) = &settings.scopes {
            endpoints.scopes = list.clone();
        }
        Ok(endpoints)
    }

    /// Consent URL whose `state` carries the local user id back to the callback.
    pub fn authorize_url(
        &self,
        settings: &ProviderSettings,
        user_id: &str,
    ) -> Result<Url, RelayError> {
        let client = BasicClient::new(ClientId::new(settings.client_id.clone()))
            .set_auth_uri(AuthUrl::from_url(self.auth_url.clone()))
            .set_redirect_uri(RedirectUrl::from_url(settings.redirect_uri.clone()));

        let state = user_id.to_string();
        let mut request = client.authorize_url(move || CsrfToken::new(state));
        request = match self.scope_style {
            ScopeStyle::SpaceSeparated => {
                request.add_scopes(self.scopes.iter().cloned().map(Scope::new))
            }
            ScopeStyle::CommaSeparated if !self.scopes.is_empty() => {
                request.add_scope(Scope::new(self.scopes.join(",")))
            }
            ScopeStyle::CommaSeparated => request,
        };
        for (key, value) in self.extra_auth_params {
            request = request.add_extra_param(*key, *value);
        }
        let (url, _state) = request.url();
        Ok(url)
    }

    /// Absolute URL for an API target: empty means the base itself,
    /// absolute URLs pass through, anything else is joined onto the base.
    pub fn resolve(&self, target: &str) -> Result<Url, RelayError> {
        if target.is_empty() {
            return Ok(self.api_base.clone());
        }
        if target.starts_with("https://") || target.starts_with("http://") {
            return Ok(Url::parse(target)?);
        }
        let mut base = self.api_base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(target.trim_start_matches('/'))?)
    }
}
