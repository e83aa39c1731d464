//! LM REST client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::LmConfig;
use crate::error::{Error, Result};
use crate::security::TokenManager;
use crate::types::{
    Assembly, ChangeAssemblyStateRequest, CreateAssemblyRequest, DeleteAssemblyRequest, Process,
    UpgradeAssemblyRequest,
};

const CREATE_ASSEMBLY: &str = "Create Assembly";
const UPGRADE_ASSEMBLY: &str = "Upgrade Assembly";
const CHANGE_ASSEMBLY_STATE: &str = "Change Assembly State";
const DELETE_ASSEMBLY: &str = "Delete Assembly";
const GET_ASSEMBLY_BY_ID: &str = "Get Assembly by id";
const GET_ASSEMBLY_BY_NAME: &str = "Get Assembly by name";
const GET_LATEST_PROCESS: &str = "Get latest Process";
const GET_PROCESS_BY_ID: &str = "Get Process by id";

/// Operations offered by LM.
///
/// Intent operations return the id of the process LM started for them and
/// never wait for that process to finish. Read operations return `Ok(None)`
/// when the subject does not exist.
#[async_trait]
pub trait LmApi: Send + Sync {
    /// Requests creation of a new assembly.
    async fn create_assembly(&self, request: CreateAssemblyRequest) -> Result<String>;

    /// Requests a descriptor and/or property change on an assembly.
    async fn upgrade_assembly(&self, request: UpgradeAssemblyRequest) -> Result<String>;

    /// Requests a lifecycle state transition.
    async fn change_assembly_state(&self, request: ChangeAssemblyStateRequest) -> Result<String>;

    /// Requests removal of an assembly.
    async fn delete_assembly(&self, request: DeleteAssemblyRequest) -> Result<String>;

    /// Looks up an assembly by its LM id.
    async fn get_assembly_by_id(&self, id: &str) -> Result<Option<Assembly>>;

    /// Looks up an assembly by its unique name.
    async fn get_assembly_by_name(&self, name: &str) -> Result<Option<Assembly>>;

    /// Returns the most recent process for the named assembly.
    async fn get_latest_process_for_name(&self, name: &str) -> Result<Option<Process>>;

    /// Looks up a process by id.
    async fn get_process_by_id(&self, id: &str) -> Result<Option<Process>>;
}

/// `reqwest`-backed [`LmApi`] implementation.
#[derive(Debug)]
pub struct LmClient {
    http: Client,
    config: LmConfig,
    tokens: TokenManager,
}

impl LmClient {
    /// Creates a client from validated settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the settings are invalid or the
    /// HTTP client cannot be constructed.
    pub fn new(config: LmConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;
        let tokens = TokenManager::new(&config);

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    /// Returns the settings the client was built from.
    #[must_use]
    pub const fn config(&self) -> &LmConfig {
        &self.config
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self.tokens.access_token(&self.http).await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn execute_intent<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        intent: &str,
        assembly_name: &str,
        body: &B,
    ) -> Result<String> {
        let url = self.config.endpoint(&format!("/api/intent/{intent}"));
        tracing::info!(url = %url, assembly_name, "submitting {operation} intent");

        let request = self.authorize(self.http.post(&url).json(body)).await?;
        let response = request
            .send()
            .await
            .map_err(|source| Error::Request { operation, source })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                url = %url,
                assembly_name,
                response_status = status.as_u16(),
                "{operation} intent rejected"
            );
            return Err(self.rejected(operation, status, body).await);
        }

        let process_id =
            process_id_from_location(response.headers()).ok_or(Error::MissingLocation { operation })?;
        tracing::info!(
            url = %url,
            assembly_name,
            process_id = %process_id,
            response_status = status.as_u16(),
            "{operation} intent accepted"
        );
        Ok(process_id)
    }

    async fn get_optional<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = self.config.endpoint(path);
        let mut request = self.http.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        let request = self.authorize(request).await?;

        let response = request
            .send()
            .await
            .map_err(|source| Error::Request { operation, source })?;
        let status = response.status();
        tracing::debug!(url = %url, response_status = status.as_u16(), "{operation}");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.rejected(operation, status, body).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| Error::Request { operation, source })?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Decode {
                operation: operation.to_string(),
                message: e.to_string(),
            })
    }

    /// Builds the error for a non-success response. A 401 drops the cached
    /// token so the next request fetches a new one.
    async fn rejected(&self, operation: &str, status: StatusCode, body: String) -> Error {
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        Error::UnexpectedStatus {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        }
    }

    async fn get_first<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let items: Option<Vec<T>> = self.get_optional(operation, path, query).await?;
        Ok(items.and_then(|items| items.into_iter().next()))
    }
}

#[async_trait]
impl LmApi for LmClient {
    async fn create_assembly(&self, request: CreateAssemblyRequest) -> Result<String> {
        self.execute_intent(
            CREATE_ASSEMBLY,
            "createAssembly",
            &request.assembly_name,
            &request,
        )
        .await
    }

    async fn upgrade_assembly(&self, request: UpgradeAssemblyRequest) -> Result<String> {
        self.execute_intent(
            UPGRADE_ASSEMBLY,
            "upgradeAssembly",
            &request.assembly_name,
            &request,
        )
        .await
    }

    async fn change_assembly_state(&self, request: ChangeAssemblyStateRequest) -> Result<String> {
        self.execute_intent(
            CHANGE_ASSEMBLY_STATE,
            "changeAssemblyState",
            &request.assembly_name,
            &request,
        )
        .await
    }

    async fn delete_assembly(&self, request: DeleteAssemblyRequest) -> Result<String> {
        self.execute_intent(
            DELETE_ASSEMBLY,
            "deleteAssembly",
            &request.assembly_name,
            &request,
        )
        .await
    }

    async fn get_assembly_by_id(&self, id: &str) -> Result<Option<Assembly>> {
        tracing::debug!(assembly_id = id, "looking up assembly by id");
        let path = format!("/api/topology/assemblies/{id}");
        self.get_optional(GET_ASSEMBLY_BY_ID, &path, &[]).await
    }

    async fn get_assembly_by_name(&self, name: &str) -> Result<Option<Assembly>> {
        tracing::debug!(assembly_name = name, "looking up assembly by name");
        self.get_first(
            GET_ASSEMBLY_BY_NAME,
            "/api/topology/assemblies",
            &[("name", name)],
        )
        .await
    }

    async fn get_latest_process_for_name(&self, name: &str) -> Result<Option<Process>> {
        tracing::debug!(assembly_name = name, "looking up latest process");
        self.get_first(
            GET_LATEST_PROCESS,
            "/api/processes",
            &[("assemblyName", name), ("limit", "1")],
        )
        .await
    }

    async fn get_process_by_id(&self, id: &str) -> Result<Option<Process>> {
        tracing::debug!(process_id = id, "looking up process by id");
        let path = format!("/api/processes/{id}");
        self.get_optional(GET_PROCESS_BY_ID, &path, &[]).await
    }
}

/// Extracts the process id from the `Location` header of an intent response.
///
/// The id is the last non-empty path segment, e.g. `/api/processes/p-42`
/// yields `p-42`.
#[must_use]
pub fn process_id_from_location(headers: &HeaderMap) -> Option<String> {
    let location = headers.get(LOCATION)?.to_str().ok()?;
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
