//! Session factory for the CMIS browser binding
//!
//! Logging in means fetching the service document with the configured
//! credentials: it proves the credentials, lists the repositories and
//! carries the URLs and capabilities the session needs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reposync_core::domain::{session_keys, CmisError, RemoteId};
use reposync_core::ports::{
    IAuthenticationProvider, ISession, ISessionFactory, RepositoryCapabilities, SessionParameters,
};
use tracing::{info, instrument, warn};
use url::Url;

use crate::client::{ClientSettings, CmisClient, Params};
use crate::model::{RepositoryInfo, RepositoryInfos};
use crate::session::{CmisSession, SELECTIVE_IGNORE_TYPE};

const DEFAULT_USER_AGENT: &str = concat!("reposync/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;

/// Opens [`CmisSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct CmisSessionFactory;

impl CmisSessionFactory {
    pub fn new() -> Self {
        Self
    }
}

fn parameter<'a>(parameters: &'a SessionParameters, key: &str) -> Option<&'a str> {
    parameters
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn millis(parameters: &SessionParameters, key: &str, default: u64) -> Duration {
    Duration::from_millis(
        parameter(parameters, key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default),
    )
}

/// Validate the parameter map and turn it into client settings
fn client_settings(parameters: &SessionParameters) -> Result<ClientSettings, CmisError> {
    let binding = parameter(parameters, session_keys::BINDING_TYPE).unwrap_or("browser");
    if binding == "atompub" || parameter(parameters, session_keys::ATOMPUB_URL).is_some() {
        return Err(CmisError::Runtime(
            "The AtomPub binding is not supported, use the browser binding".to_string(),
        ));
    }

    let auth_type = parameter(parameters, session_keys::AUTH_TYPE).unwrap_or("basic");
    if auth_type != "basic" {
        return Err(CmisError::Runtime(format!(
            "Authentication type {auth_type} is not supported"
        )));
    }

    let url = parameter(parameters, session_keys::BROWSER_URL)
        .ok_or_else(|| CmisError::Runtime("No browser binding URL configured".to_string()))?;
    let service_url =
        Url::parse(url).map_err(|e| CmisError::Runtime(format!("Invalid URL {url}: {e}")))?;

    Ok(ClientSettings {
        service_url,
        user: parameter(parameters, session_keys::USER)
            .unwrap_or_default()
            .to_string(),
        password: parameter(parameters, session_keys::PASSWORD)
            .unwrap_or_default()
            .to_string(),
        user_agent: parameter(parameters, session_keys::USER_AGENT)
            .unwrap_or(DEFAULT_USER_AGENT)
            .to_string(),
        connect_timeout: millis(
            parameters,
            session_keys::CONNECT_TIMEOUT,
            DEFAULT_CONNECT_TIMEOUT_MS,
        ),
        read_timeout: millis(parameters, session_keys::READ_TIMEOUT, DEFAULT_READ_TIMEOUT_MS),
    })
}

/// Pick the configured repository; an empty id selects the only one
fn select_repository(
    mut infos: RepositoryInfos,
    repository_id: Option<&str>,
) -> Result<RepositoryInfo, CmisError> {
    match repository_id {
        Some(id) => infos
            .remove(id)
            .ok_or_else(|| CmisError::Runtime(format!("Unknown repository: {id}"))),
        None if infos.len() == 1 => infos
            .into_values()
            .next()
            .ok_or_else(|| CmisError::Runtime("No repository available".to_string())),
        None => Err(CmisError::Runtime(format!(
            "Server offers {} repositories, a repository id is required",
            infos.len()
        ))),
    }
}

fn join(base: &Url, segment: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), segment)
}

/// Ask for the selective-ignore type; absence means no support
async fn supports_selective_ignore(
    client: &CmisClient,
    repository_url: &str,
) -> Result<bool, CmisError> {
    let query: Params = vec![
        ("cmisselector", "typeDefinition".to_string()),
        ("typeId", SELECTIVE_IGNORE_TYPE.to_string()),
    ];
    match client
        .get_json::<serde_json::Value>(repository_url, &query)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.is_connection() => Err(e),
        Err(_) => Ok(false),
    }
}

#[async_trait]
impl ISessionFactory for CmisSessionFactory {
    #[instrument(skip_all)]
    async fn create_session(
        &self,
        parameters: &SessionParameters,
        auth_provider: Option<Arc<dyn IAuthenticationProvider>>,
    ) -> Result<Arc<dyn ISession>, CmisError> {
        let settings = client_settings(parameters)?;
        let client = Arc::new(CmisClient::new(settings, auth_provider)?);
        client.restore_cookies().await;

        let infos: RepositoryInfos = match client.get_json(client.service_url().as_str(), &Vec::new()).await {
            Ok(infos) => infos,
            Err(e) => {
                if matches!(e, CmisError::PermissionDenied { .. }) {
                    client.clear_cookies().await;
                }
                return Err(e);
            }
        };

        let info = select_repository(infos, parameter(parameters, session_keys::REPOSITORY_ID))?;
        let root_folder_id = RemoteId::new(info.root_folder_id.as_str())
            .map_err(|e| CmisError::Runtime(format!("Invalid root folder id: {e}")))?;
        let repository_url = info
            .repository_url
            .clone()
            .unwrap_or_else(|| join(client.service_url(), &info.repository_id));
        let root_folder_url = info
            .root_folder_url
            .clone()
            .unwrap_or_else(|| format!("{repository_url}/root"));

        let selective_ignore = match supports_selective_ignore(&client, &repository_url).await {
            Ok(supported) => supported,
            Err(e) => {
                warn!(error = %e, "Could not detect selective-ignore support");
                return Err(e);
            }
        };
        let capabilities = RepositoryCapabilities {
            change_log: info.has_change_log(),
            selective_ignore,
        };

        info!(
            repository = %info.repository_id,
            change_log = capabilities.change_log,
            selective_ignore = capabilities.selective_ignore,
            "CMIS session opened"
        );

        Ok(Arc::new(CmisSession::new(
            client,
            info.repository_id,
            root_folder_id,
            repository_url,
            root_folder_url,
            capabilities,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> SessionParameters {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_settings_from_parameters() {
        let settings = client_settings(&params(&[
            ("browser-url", "https://cmis.example.com/browser"),
            ("user", "alice"),
            ("password", "pw"),
            ("connect-timeout", "1500"),
            ("user-agent", "custom/1.0"),
        ]))
        .unwrap();
        assert_eq!(settings.service_url.as_str(), "https://cmis.example.com/browser");
        assert_eq!(settings.user, "alice");
        assert_eq!(settings.connect_timeout, Duration::from_millis(1500));
        assert_eq!(settings.read_timeout, Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));
        assert_eq!(settings.user_agent, "custom/1.0");
    }

    #[test]
    fn test_atompub_and_other_auth_are_rejected() {
        let atompub = client_settings(&params(&[
            ("binding-type", "atompub"),
            ("atompub-url", "https://cmis.example.com/atom"),
        ]));
        assert!(matches!(atompub, Err(CmisError::Runtime(m)) if m.contains("AtomPub")));

        let ntlm = client_settings(&params(&[
            ("browser-url", "https://cmis.example.com/browser"),
            ("auth-type", "ntlm"),
        ]));
        assert!(matches!(ntlm, Err(CmisError::Runtime(_))));

        assert!(client_settings(&HashMap::new()).is_err());
    }

    #[test]
    fn test_select_repository() {
        let infos: RepositoryInfos = serde_json::from_value(serde_json::json!({
            "a": { "repositoryId": "a", "rootFolderId": "ra" },
            "b": { "repositoryId": "b", "rootFolderId": "rb" }
        }))
        .unwrap();
        assert_eq!(
            select_repository(infos.clone(), Some("b")).unwrap().root_folder_id,
            "rb"
        );
        assert!(matches!(
            select_repository(infos.clone(), Some("zzz")),
            Err(CmisError::Runtime(m)) if m.contains("Unknown repository")
        ));
        assert!(select_repository(infos, None).is_err());
    }
}
