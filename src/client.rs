//! REST client for Azure DevOps Services / Server, implementing the collaborator traits of
//! `ado_export_core::contract`.

use ado_export_core::contract::{
    BuildSummary, GitRepository, Page, PipelineDefinition, PipelineDefinitionRef,
    PipelineService, QueryError, RelationLink, ServiceError, SourceControlService,
    WorkItemDetailService, WorkItemId, WorkItemQuery, WorkItemQueryService, WorkItemRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};
use urlencoding::encode;

const API_VERSION: &str = "7.1";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";

pub struct AzureDevOpsClient {
    base_url: String,
    access_token: Option<String>,
    too_many_results_marker: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionData {
    authenticated_user: Option<Identity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identity {
    #[serde(default)]
    provider_display_name: String,
}

#[derive(Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResult {
    #[serde(default)]
    work_items: Vec<WorkItemReference>,
}

#[derive(Deserialize)]
struct WorkItemReference {
    id: WorkItemId,
}

#[derive(Deserialize)]
struct RawWorkItem {
    id: WorkItemId,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
    #[serde(default)]
    relations: Option<Vec<RawRelation>>,
}

#[derive(Deserialize)]
struct RawRelation {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesetRef {
    changeset_id: i64,
}

#[derive(Deserialize)]
struct GitRef {
    name: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl AzureDevOpsClient {
    /// Connects to the organization or collection at `address`. Fails when the server does
    /// not accept the credentials or only grants anonymous access.
    pub async fn connect(
        address: &str,
        access_token: Option<String>,
        too_many_results_marker: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let client = Self {
            base_url: address.trim_end_matches('/').to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
            too_many_results_marker: too_many_results_marker.into(),
            http: reqwest::Client::new(),
        };

        let url = client.url("_apis/connectionData", &[]);
        let (data, _) = client.get_json::<ConnectionData>(&url).await?;
        let user = data
            .authenticated_user
            .map(|u| u.provider_display_name)
            .unwrap_or_default();
        if user.is_empty() || user.eq_ignore_ascii_case("anonymous") {
            return Err(ServiceError::Unauthorized(format!(
                "{} accepted the connection only as an anonymous user",
                client.base_url
            )));
        }
        info!(address = %client.base_url, user = %user, "Connected to Azure DevOps");
        Ok(client)
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}?api-version={API_VERSION}", self.base_url, path);
        for (key, value) in query {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&encode(value));
        }
        url
    }

    fn project_url(&self, project: &str, path: &str, query: &[(&str, String)]) -> String {
        self.url(&format!("{}/{}", encode(project), path), query)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.basic_auth("", Some(token)),
            None => request,
        }
    }

    /// Sends the request and returns the body of a successful response with its
    /// continuation token.
    async fn send(
        &self,
        url: &str,
        request: RequestBuilder,
    ) -> Result<(String, Option<String>), Failure> {
        let response = self
            .authorize(request)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(Failure::Transport)?;
        let status = response.status();
        let token = response
            .headers()
            .get(CONTINUATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(Failure::Transport)?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "Azure DevOps response");
        // 203 is how the service answers a rejected token: a sign-in page.
        if !status.is_success() || status == StatusCode::NON_AUTHORITATIVE_INFORMATION {
            return Err(Failure::Status(status, body));
        }
        Ok((body, token))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<(T, Option<String>), ServiceError> {
        let (body, token) = self
            .send(url, self.http.get(url))
            .await
            .map_err(|f| f.into_service_error(url))?;
        let parsed = decode(url, &body)?;
        Ok((parsed, token))
    }
}

enum Failure {
    Transport(reqwest::Error),
    Status(StatusCode, String),
}

impl Failure {
    fn into_service_error(self, url: &str) -> ServiceError {
        match self {
            Failure::Transport(source) => ServiceError::Transport {
                url: url.to_string(),
                source: Box::new(source),
            },
            Failure::Status(status, body) => status_error(url, status, body),
        }
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|e| ServiceError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn status_error(url: &str, status: StatusCode, body: String) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::NON_AUTHORITATIVE_INFORMATION => {
            ServiceError::Unauthorized(format!("{url} answered {status}"))
        }
        _ => ServiceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: error_message(&body),
        },
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.chars().take(500).collect())
}

/// Tells a query refused for exceeding the row cap apart from any other failure.
pub fn classify_query_failure(url: &str, status: StatusCode, body: String, marker: &str) -> QueryError {
    if status.is_client_error() && body.contains(marker) {
        return QueryError::TooManyResults(error_message(&body));
    }
    QueryError::Other(status_error(url, status, body))
}

fn display_name(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Object(identity) => identity
            .get("displayName")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn string_field(fields: &serde_json::Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn into_record(raw: RawWorkItem) -> Result<WorkItemRecord, String> {
    let created = raw
        .fields
        .get("System.CreatedDate")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("work item {} has no System.CreatedDate", raw.id))?;
    let created_date = DateTime::parse_from_rfc3339(created)
        .map_err(|e| format!("work item {}: bad System.CreatedDate {created:?}: {e}", raw.id))?
        .with_timezone(&Utc);
    Ok(WorkItemRecord {
        id: raw.id,
        work_item_type: string_field(&raw.fields, "System.WorkItemType"),
        state: string_field(&raw.fields, "System.State"),
        created_date,
        created_by: display_name(raw.fields.get("System.CreatedBy")).unwrap_or_default(),
        assigned_to: display_name(raw.fields.get("System.AssignedTo")),
        relations: raw
            .relations
            .unwrap_or_default()
            .into_iter()
            .map(|r| RelationLink { url: r.url })
            .collect(),
    })
}

/// Null entries are ids the service omitted. A record that cannot be decoded is logged
/// and left out; the rest of the batch is kept.
fn parse_work_items(url: &str, body: &str) -> Result<Vec<WorkItemRecord>, ServiceError> {
    let list: ValueList<Option<RawWorkItem>> = decode(url, body)?;
    Ok(list
        .value
        .into_iter()
        .flatten()
        .filter_map(|raw| match into_record(raw) {
            Ok(record) => Some(record),
            Err(reason) => {
                error!(url, %reason, "Skipping undecodable work item");
                None
            }
        })
        .collect())
}

fn token_query(token: Option<String>) -> Vec<(&'static str, String)> {
    token
        .map(|t| vec![("continuationToken", t)])
        .unwrap_or_default()
}

#[async_trait]
impl WorkItemQueryService for AzureDevOpsClient {
    async fn query_ids(&self, query: &WorkItemQuery) -> Result<Vec<WorkItemId>, QueryError> {
        let url = self.project_url(&query.project, "_apis/wit/wiql", &[]);
        let request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "query": query.to_wiql() }));
        let (body, _) = self.send(&url, request).await.map_err(|failure| match failure {
            Failure::Status(status, body) => {
                classify_query_failure(&url, status, body, &self.too_many_results_marker)
            }
            other => QueryError::Other(other.into_service_error(&url)),
        })?;
        let result: WiqlResult = decode(&url, &body)?;
        Ok(result.work_items.into_iter().map(|w| w.id).collect())
    }
}

#[async_trait]
impl WorkItemDetailService for AzureDevOpsClient {
    async fn get_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemRecord>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
        let url = self.url(
            "_apis/wit/workitems",
            &[
                ("ids", joined),
                ("$expand", "relations".into()),
                ("errorPolicy", "omit".into()),
            ],
        );
        let (body, _) = self
            .send(&url, self.http.get(&url))
            .await
            .map_err(|f| f.into_service_error(&url))?;
        parse_work_items(&url, &body)
    }
}

#[async_trait]
impl PipelineService for AzureDevOpsClient {
    async fn list_definitions(
        &self,
        project: &str,
        continuation_token: Option<String>,
    ) -> Result<Page<PipelineDefinitionRef>, ServiceError> {
        let mut query = vec![("queryOrder", "lastModifiedDescending".to_string())];
        query.extend(token_query(continuation_token));
        let url = self.project_url(project, "_apis/build/definitions", &query);
        let (list, token) = self.get_json::<ValueList<PipelineDefinitionRef>>(&url).await?;
        Ok(Page {
            items: list.value,
            continuation_token: token,
        })
    }

    async fn get_definition(
        &self,
        project: &str,
        definition_id: i64,
    ) -> Result<PipelineDefinition, ServiceError> {
        let url = self.project_url(project, &format!("_apis/build/definitions/{definition_id}"), &[]);
        let (definition, _) = self.get_json(&url).await?;
        Ok(definition)
    }

    async fn list_builds(
        &self,
        project: &str,
        definition_id: i64,
        continuation_token: Option<String>,
    ) -> Result<Page<BuildSummary>, ServiceError> {
        let mut query = vec![("definitions", definition_id.to_string())];
        query.extend(token_query(continuation_token));
        let url = self.project_url(project, "_apis/build/builds", &query);
        let (list, token) = self.get_json::<ValueList<BuildSummary>>(&url).await?;
        Ok(Page {
            items: list.value,
            continuation_token: token,
        })
    }
}

#[async_trait]
impl SourceControlService for AzureDevOpsClient {
    async fn list_changesets(
        &self,
        project: &str,
        to_id: Option<i64>,
    ) -> Result<Vec<i64>, ServiceError> {
        let mut query = vec![("searchCriteria.itemPath", format!("$/{project}"))];
        if let Some(to_id) = to_id {
            query.push(("searchCriteria.toId", to_id.to_string()));
        }
        let url = self.project_url(project, "_apis/tfvc/changesets", &query);
        let (list, _) = self.get_json::<ValueList<ChangesetRef>>(&url).await?;
        Ok(list.value.into_iter().map(|c| c.changeset_id).collect())
    }

    async fn list_git_repositories(&self, project: &str) -> Result<Vec<GitRepository>, ServiceError> {
        let url = self.project_url(project, "_apis/git/repositories", &[]);
        let (list, _) = self.get_json::<ValueList<GitRepository>>(&url).await?;
        Ok(list.value)
    }

    async fn list_branches(
        &self,
        project: &str,
        repository_id: &str,
        continuation_token: Option<String>,
    ) -> Result<Page<String>, ServiceError> {
        let mut query = vec![("filter", "heads/".to_string())];
        query.extend(token_query(continuation_token));
        let path = format!("_apis/git/repositories/{}/refs", encode(repository_id));
        let url = self.project_url(project, &path, &query);
        let (list, token) = self.get_json::<ValueList<GitRef>>(&url).await?;
        Ok(Page {
            items: list.value.into_iter().map(|r| r.name).collect(),
            continuation_token: token,
        })
    }
}
