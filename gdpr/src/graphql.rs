//! GraphQL implementation of [`ProfileBackend`].

use crate::backend::{
    AuthorizationCodes, BackendFuture, DeleteOutcome, IdentityBroker, ProfileBackend,
    ServiceConnection,
};
use crate::error::{GdprError, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

const SERVICE_CONNECTIONS_QUERY: &str = r"
query MyProfileServiceConnections {
  myProfile {
    serviceConnections {
      edges { node { service { name title gdprQueryScope gdprDeleteScope isPureKeycloak } } }
    }
  }
}";

const DOWNLOAD_PROFILE_QUERY: &str = r"
query DownloadMyProfile($authorizationCode: String!, $authorizationCodeKeycloak: String) {
  downloadMyProfile(
    authorizationCode: $authorizationCode
    authorizationCodeKeycloak: $authorizationCodeKeycloak
  )
}";

const DELETE_PROFILE_MUTATION: &str = r"
mutation DeleteMyProfile($input: DeleteMyProfileMutationInput!) {
  deleteMyProfile(input: $input) {
    results { service { name } success errors { code message } }
  }
}";

/// Connection settings for [`GraphqlProfileBackend`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,
    /// API token sent as a bearer token
    pub api_token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl BackendConfig {
    /// Create a configuration for `endpoint` with no token and a 30 second
    /// timeout.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Load from `PROFILE_GRAPHQL_ENDPOINT` and optional `PROFILE_API_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::EnvVarNotSet`] if the endpoint is not set.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("PROFILE_GRAPHQL_ENDPOINT")
            .map_err(|_| GdprError::EnvVarNotSet("PROFILE_GRAPHQL_ENDPOINT".to_string()))?;
        let mut config = Self::new(endpoint);
        config.api_token = std::env::var("PROFILE_API_TOKEN").ok();
        Ok(config)
    }

    /// Authenticate requests with `token`.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Profile backend speaking GraphQL over HTTPS.
#[derive(Debug, Clone)]
pub struct GraphqlProfileBackend {
    client: Client,
    config: BackendConfig,
}

impl GraphqlProfileBackend {
    /// Create a backend client.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::RequestFailed`] if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GdprError::RequestFailed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Post `query` and decode its `data`.
    async fn execute<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GdprError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .json::<GraphqlResponse<T>>()
                    .await
                    .map_err(|e| GdprError::ResponseParseFailed(e.to_string()))?;
                body.into_data()
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), "profile backend rejected request");
                Err(GdprError::Http {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

fn code_variables(codes: &AuthorizationCodes) -> Value {
    json!({
        "authorizationCode": codes.legacy.clone().unwrap_or_default(),
        "authorizationCodeKeycloak": codes.modern,
    })
}

impl ProfileBackend for GraphqlProfileBackend {
    fn service_connections(&self) -> BackendFuture<'_, Vec<ServiceConnection>> {
        Box::pin(async move {
            let data: ServiceConnectionsData =
                self.execute(SERVICE_CONNECTIONS_QUERY, json!({})).await?;
            Ok(data.into_connections())
        })
    }

    fn download_profile(&self, codes: AuthorizationCodes) -> BackendFuture<'_, Value> {
        Box::pin(async move {
            let data: DownloadData = self
                .execute(DOWNLOAD_PROFILE_QUERY, code_variables(&codes))
                .await?;
            data.into_profile()
        })
    }

    fn delete_profile(&self, codes: AuthorizationCodes) -> BackendFuture<'_, DeleteOutcome> {
        Box::pin(async move {
            let data: DeleteData = self
                .execute(
                    DELETE_PROFILE_MUTATION,
                    json!({ "input": code_variables(&codes) }),
                )
                .await?;
            data.into_outcome()
        })
    }
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

impl<T> GraphqlResponse<T> {
    fn into_data(self) -> Result<T> {
        if !self.errors.is_empty() {
            return Err(GdprError::Graphql(
                self.errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        self.data
            .ok_or_else(|| GdprError::ResponseParseFailed("response has no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceConnectionsData {
    my_profile: Option<ProfileNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileNode {
    service_connections: Connection<ServiceConnectionNode>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    edges: Vec<Option<Edge<T>>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ServiceConnectionNode {
    service: ServiceNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceNode {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    gdpr_query_scope: Option<String>,
    #[serde(default)]
    gdpr_delete_scope: Option<String>,
    #[serde(default)]
    is_pure_keycloak: bool,
}

impl ServiceConnectionsData {
    fn into_connections(self) -> Vec<ServiceConnection> {
        let Some(profile) = self.my_profile else {
            return Vec::new();
        };
        profile
            .service_connections
            .edges
            .into_iter()
            .filter_map(|edge| edge.and_then(|e| e.node))
            .map(|node| {
                let service = node.service;
                ServiceConnection {
                    title: service.title.unwrap_or_else(|| service.name.clone()),
                    name: service.name,
                    gdpr_query_scope: service.gdpr_query_scope.unwrap_or_default(),
                    gdpr_delete_scope: service.gdpr_delete_scope.unwrap_or_default(),
                    broker: if service.is_pure_keycloak {
                        IdentityBroker::Modern
                    } else {
                        IdentityBroker::Legacy
                    },
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadData {
    download_my_profile: Option<Value>,
}

impl DownloadData {
    /// The backend returns the profile either as a JSON object or as a JSON
    /// document encoded in a string.
    fn into_profile(self) -> Result<Value> {
        match self.download_my_profile {
            Some(Value::String(encoded)) => serde_json::from_str(&encoded)
                .map_err(|e| GdprError::ResponseParseFailed(e.to_string())),
            Some(Value::Null) | None => Err(GdprError::ResponseParseFailed(
                "downloadMyProfile is empty".to_string(),
            )),
            Some(profile) => Ok(profile),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteData {
    delete_my_profile: Option<DeletePayload>,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    #[serde(default)]
    results: Vec<DeleteResult>,
}

#[derive(Debug, Deserialize)]
struct DeleteResult {
    service: DeleteResultService,
    success: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteResultService {
    name: String,
}

impl DeleteData {
    fn into_outcome(self) -> Result<DeleteOutcome> {
        let Some(payload) = self.delete_my_profile else {
            return Err(GdprError::ResponseParseFailed(
                "deleteMyProfile is empty".to_string(),
            ));
        };
        let failed_services: Vec<String> = payload
            .results
            .into_iter()
            .filter(|result| !result.success)
            .map(|result| result.service.name)
            .collect();
        Ok(DeleteOutcome {
            deleted: failed_services.is_empty(),
            failed_services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connections_map_broker_and_missing_fields() {
        let data: ServiceConnectionsData = serde_json::from_value(json!({
            "myProfile": {
                "serviceConnections": {
                    "edges": [
                        {"node": {"service": {
                            "name": "berth",
                            "title": "Venepaikat",
                            "gdprQueryScope": "berth.gdprquery",
                            "gdprDeleteScope": "berth.gdprdelete",
                            "isPureKeycloak": false
                        }}},
                        null,
                        {"node": {"service": {
                            "name": "youth",
                            "gdprQueryScope": "youth.gdprquery",
                            "isPureKeycloak": true
                        }}}
                    ]
                }
            }
        }))
        .unwrap();

        let connections = data.into_connections();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].broker, IdentityBroker::Legacy);
        assert_eq!(connections[0].gdpr_delete_scope, "berth.gdprdelete");
        assert_eq!(connections[1].broker, IdentityBroker::Modern);
        assert_eq!(connections[1].title, "youth");
        assert_eq!(connections[1].gdpr_delete_scope, "");
    }

    #[test]
    fn test_missing_profile_has_no_connections() {
        let data: ServiceConnectionsData =
            serde_json::from_value(json!({"myProfile": null})).unwrap();
        assert!(data.into_connections().is_empty());
    }

    #[test]
    fn test_graphql_errors_take_precedence_over_data() {
        let response: GraphqlResponse<Value> = serde_json::from_value(json!({
            "data": {"downloadMyProfile": null},
            "errors": [{"message": "Permission denied"}, {"message": "Try again"}]
        }))
        .unwrap();

        assert_eq!(
            response.into_data(),
            Err(GdprError::Graphql(vec![
                "Permission denied".to_string(),
                "Try again".to_string()
            ]))
        );
    }

    #[test]
    fn test_download_accepts_encoded_and_plain_profiles() {
        let encoded = DownloadData {
            download_my_profile: Some(json!(r#"{"key": "DATA", "children": []}"#)),
        };
        assert_eq!(encoded.into_profile().unwrap()["key"], "DATA");

        let plain = DownloadData {
            download_my_profile: Some(json!({"key": "DATA"})),
        };
        assert_eq!(plain.into_profile().unwrap(), json!({"key": "DATA"}));

        let empty = DownloadData {
            download_my_profile: None,
        };
        assert!(matches!(
            empty.into_profile(),
            Err(GdprError::ResponseParseFailed(_))
        ));
    }

    #[test]
    fn test_delete_outcome_lists_failed_services() {
        let data: DeleteData = serde_json::from_value(json!({
            "deleteMyProfile": {"results": [
                {"service": {"name": "berth"}, "success": true, "errors": []},
                {"service": {"name": "youth"}, "success": false,
                 "errors": [{"code": "FORBIDDEN", "message": "no"}]}
            ]}
        }))
        .unwrap();

        assert_eq!(
            data.into_outcome().unwrap(),
            DeleteOutcome {
                deleted: false,
                failed_services: vec!["youth".to_string()],
            }
        );
    }

    #[test]
    fn test_empty_delete_payload_is_an_error() {
        let data: DeleteData = serde_json::from_value(json!({"deleteMyProfile": null})).unwrap();
        assert_eq!(
            data.into_outcome(),
            Err(GdprError::ResponseParseFailed("deleteMyProfile is empty".to_string()))
        );
    }

    #[test]
    fn test_code_variables_shape() {
        let variables = code_variables(&AuthorizationCodes {
            legacy: None,
            modern: Some("kc".to_string()),
        });
        assert_eq!(
            variables,
            json!({"authorizationCode": "", "authorizationCodeKeycloak": "kc"})
        );
    }

    #[test]
    fn test_config_builders() {
        let config = BackendConfig::new("https://api.hel.fi/profiili/graphql/")
            .with_api_token("token")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.api_token.as_deref(), Some("token"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(GraphqlProfileBackend::new(config).is_ok());
    }
}
