//! HTTP plumbing shared by the session factory and the session
//!
//! Wraps `reqwest::Client` with basic authentication, the configured
//! timeouts and user agent, and a cookie jar that is mirrored into the
//! authentication provider so a later login can resume the server-side
//! session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use reposync_core::domain::CmisError;
use reposync_core::ports::{IAuthenticationProvider, StoredCookie};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::Form;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cookies;
use crate::errors::{error_from_response, error_from_transport};

/// Query or form parameters
pub(crate) type Params = Vec<(&'static str, String)>;

/// Connection settings taken from the session parameters
#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    pub service_url: Url,
    pub user: String,
    pub password: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

pub(crate) struct CmisClient {
    http: Client,
    settings: ClientSettings,
    auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
    jar: Mutex<Vec<StoredCookie>>,
}

impl CmisClient {
    pub fn new(
        settings: ClientSettings,
        auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
    ) -> Result<Self, CmisError> {
        let http = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()
            .map_err(|e| CmisError::Runtime(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            settings,
            auth_provider,
            jar: Mutex::new(Vec::new()),
        })
    }

    pub fn service_url(&self) -> &Url {
        &self.settings.service_url
    }

    /// Load cookies persisted by an earlier session
    pub async fn restore_cookies(&self) {
        let Some(provider) = &self.auth_provider else {
            return;
        };
        match provider.load_cookies(self.settings.service_url.as_str()).await {
            Ok(stored) => {
                debug!(count = stored.len(), "Restored session cookies");
                *self.jar.lock().unwrap_or_else(PoisonError::into_inner) = stored;
            }
            Err(e) => warn!(error = %e, "Could not load stored cookies"),
        }
    }

    /// Forget cookies, both in memory and in the provider
    pub async fn clear_cookies(&self) {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some(provider) = &self.auth_provider {
            if let Err(e) = provider
                .delete_cookies(self.settings.service_url.as_str())
                .await
            {
                warn!(error = %e, "Could not delete stored cookies");
            }
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &Params) -> Result<T, CmisError> {
        let response = self.send(self.http.get(url).query(query)).await?;
        response.json().await.map_err(error_from_transport)
    }

    pub async fn get_bytes(&self, url: &str, query: &Params) -> Result<Vec<u8>, CmisError> {
        let response = self.send(self.http.get(url).query(query)).await?;
        let bytes = response.bytes().await.map_err(error_from_transport)?;
        Ok(bytes.to_vec())
    }

    pub async fn post_form<T: DeserializeOwned>(&self, url: &str, form: &Params) -> Result<T, CmisError> {
        let response = self.send(self.http.post(url).form(form)).await?;
        response.json().await.map_err(error_from_transport)
    }

    /// POST an action without reading a body (delete returns none)
    pub async fn post_form_empty(&self, url: &str, form: &Params) -> Result<(), CmisError> {
        self.send(self.http.post(url).form(form)).await?;
        Ok(())
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        url: &str,
        form: Form,
    ) -> Result<T, CmisError> {
        let response = self.send(self.http.post(url).multipart(form)).await?;
        response.json().await.map_err(error_from_transport)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, CmisError> {
        let mut builder = builder.basic_auth(&self.settings.user, Some(&self.settings.password));
        let cookie_header = {
            let jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
            cookies::header_value(&jar, Utc::now())
        };
        if let Some(value) = cookie_header {
            builder = builder.header(COOKIE, value);
        }

        let response = builder.send().await.map_err(error_from_transport)?;
        trace!(url = %response.url(), status = response.status().as_u16(), "CMIS response");
        self.capture_cookies(&response).await;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let err = error_from_response(status, &headers, &body);
        debug!(status = status.as_u16(), category = err.category(), "CMIS request failed");
        Err(err)
    }

    async fn capture_cookies(&self, response: &Response) {
        let now = Utc::now();
        let received: Vec<StoredCookie> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| cookies::parse_set_cookie(value, response.url(), now))
            .collect();
        if received.is_empty() {
            return;
        }

        let snapshot = {
            let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
            for cookie in received {
                cookies::merge(&mut jar, cookie);
            }
            jar.retain(|c| !c.is_expired(now));
            jar.clone()
        };

        if let Some(provider) = &self.auth_provider {
            if let Err(e) = provider
                .save_cookies(self.settings.service_url.as_str(), &snapshot)
                .await
            {
                warn!(error = %e, "Could not persist cookies");
            }
        }
    }
}
