// # HTTP Control Plane
//
// REST implementation of `ControlPlane` for the cloud control plane API.
//
// Every call is a single request. Retries, backoff and classification of
// failures belong to the core; this crate only turns HTTP exchanges into
// `RemoteResult`s:
//
// - 200 → the decoded JSON body
// - any other status with a JSON object body → `RemoteError::Api`
//   (`detail` is kept only when it is an object)
// - unparsable error body, connection failure, timeout → `RemoteError::Transport`
//
// ## Security Requirements
//
// - The access token never appears in logs or `Debug` output
// - Construction fails fast on an empty token
//
// ## API Reference
//
// - Organization lookup: GET `{prefix}/user/organization`
// - Create: POST `{prefix}/{path}` (body carries `zone_id` and `organization_id`)
// - Read / update / delete: GET / PATCH / DELETE `{prefix}/{path}/{id}`
// - List: GET `{prefix}/{path}?filter_<field>=<value>`
// - Catalogue lookup: GET `{prefix}/user/region` or `{prefix}/user/infra/<source>`
//   with `filter_<field>` parameters plus `skip=0&count=<n>`

use async_trait::async_trait;
use eci_core::config::ControlPlaneConfig;
use eci_core::error::{ApiError, RemoteError, RemoteResult};
use eci_core::traits::{ControlPlane, ControlPlaneFactory};
use eci_core::{
    Attributes, ControlPlaneRegistry, DataSourceKind, DeleteResponse, Error, InfraRecord,
    ListFilter, Patch, RemoteResource, ResourceKind, Result, descriptor_for,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct OrganizationResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// Control plane reached over HTTP
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: String,
    path_prefix: String,
    /// ⚠️ NEVER log this value
    api_access_token: String,
    zone_id: String,
    organization_id: String,
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for HttpControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpControlPlane")
            .field("base_url", &self.base_url)
            .field("path_prefix", &self.path_prefix)
            .field("api_access_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

impl HttpControlPlane {
    /// Connect to the control plane and resolve the caller's organization
    ///
    /// # Errors
    ///
    /// - empty token or endpoint
    /// - the organization lookup fails
    pub async fn connect(
        api_endpoint: impl Into<String>,
        api_access_token: impl Into<String>,
        path_prefix: impl Into<String>,
        zone_id: impl Into<String>,
    ) -> Result<Self> {
        let mut plane = Self::with_organization(
            api_endpoint,
            api_access_token,
            path_prefix,
            zone_id,
            String::new(),
        )?;

        let url = format!("{}{}/user/organization", plane.base_url, plane.path_prefix);
        let body = plane
            .send(plane.client.request(Method::GET, &url))
            .await
            .map_err(|e| Error::call("failed to get organization", "user/organization", e))?;
        let organization: OrganizationResponse = serde_json::from_value(body)?;

        tracing::info!(
            organization_id = %organization.id,
            "Connected to control plane at {}",
            plane.base_url
        );
        plane.organization_id = organization.id;
        Ok(plane)
    }

    /// Build a client for a known organization without any network call
    pub fn with_organization(
        api_endpoint: impl Into<String>,
        api_access_token: impl Into<String>,
        path_prefix: impl Into<String>,
        zone_id: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Result<Self> {
        let api_access_token = api_access_token.into();
        if api_access_token.is_empty() {
            return Err(Error::config("API access token cannot be empty"));
        }
        let base_url = api_endpoint.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::config("API endpoint cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            path_prefix: path_prefix.into(),
            api_access_token,
            zone_id: zone_id.into(),
            organization_id: organization_id.into(),
        })
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    fn collection_url(&self, kind: ResourceKind) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            self.path_prefix,
            descriptor_for(kind).api_path
        )
    }

    fn item_url(&self, kind: ResourceKind, id: &str) -> String {
        format!("{}/{}", self.collection_url(kind), id)
    }

    fn catalogue_url(&self, source: DataSourceKind) -> String {
        match source {
            DataSourceKind::Region => format!("{}{}/user/region", self.base_url, self.path_prefix),
            _ => format!(
                "{}{}/user/infra/{}",
                self.base_url,
                self.path_prefix,
                source.as_str()
            ),
        }
    }

    /// Query parameters of a catalogue lookup
    fn lookup_query(
        &self,
        source: DataSourceKind,
        filter: &ListFilter,
        count: usize,
    ) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = filter
            .criteria()
            .chain(source.fixed_filters().iter().copied())
            .map(|(field, value)| (format!("filter_{}", field), value.to_string()))
            .collect();
        if source.is_zone_scoped() {
            query.push(("filter_zone_id".to_string(), self.zone_id.clone()));
        }
        query.push(("skip".to_string(), "0".to_string()));
        query.push(("count".to_string(), count.to_string()));
        query
    }

    /// Send one request and map the response onto `RemoteResult`
    async fn send(&self, request: RequestBuilder) -> RemoteResult<Value> {
        let response = request
            .bearer_auth(&self.api_access_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::transport(format!("Failed to read response: {}", e)))?;

        if status != StatusCode::OK {
            return Err(error_from_response(status, &body));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| RemoteError::transport(format!("Failed to parse response: {}", e)))
    }
}

/// Build the remote error for a non-200 response
fn error_from_response(status: StatusCode, body: &[u8]) -> RemoteError {
    let parsed: Option<serde_json::Map<String, Value>> = serde_json::from_slice(body).ok();
    let Some(data) = parsed else {
        return RemoteError::transport(format!(
            "failed to parse error message: {}, http status: {}",
            String::from_utf8_lossy(body),
            status
        ));
    };

    let mut err = ApiError::new(status.as_u16());
    if let Some(code) = data.get("code").and_then(Value::as_str) {
        err = err.with_code(code);
    }
    if let Some(message) = data.get("message").and_then(Value::as_str) {
        err = err.with_message(message);
    }
    if let Some(Value::Object(detail)) = data.get("detail") {
        err = err.with_detail(detail.clone());
    }
    err.into()
}

fn decode_resource(value: Value) -> RemoteResult<RemoteResource> {
    RemoteResource::from_json(value).map_err(RemoteError::transport)
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create(&self, kind: ResourceKind, spec: &Attributes) -> RemoteResult<String> {
        let mut body = spec.clone();
        body.insert("zone_id".to_string(), Value::String(self.zone_id.clone()));
        body.insert(
            "organization_id".to_string(),
            Value::String(self.organization_id.clone()),
        );

        tracing::debug!(kind = %kind, "POST {}", descriptor_for(kind).api_path);
        let value = self
            .send(self.client.post(self.collection_url(kind)).json(&body))
            .await?;
        let created: CreatedResponse = serde_json::from_value(value)
            .map_err(|e| RemoteError::transport(format!("Invalid create response: {}", e)))?;
        Ok(created.id)
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> RemoteResult<RemoteResource> {
        tracing::debug!(kind = %kind, resource_id = %id, "GET");
        let value = self.send(self.client.get(self.item_url(kind, id))).await?;
        decode_resource(value)
    }

    async fn patch(&self, kind: ResourceKind, id: &str, patch: &Patch) -> RemoteResult<()> {
        tracing::debug!(kind = %kind, resource_id = %id, "PATCH");
        self.send(self.client.patch(self.item_url(kind, id)).json(patch.as_map()))
            .await?;
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> RemoteResult<DeleteResponse> {
        tracing::debug!(kind = %kind, resource_id = %id, "DELETE");
        let value = self.send(self.client.delete(self.item_url(kind, id))).await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::transport(format!("Invalid delete response: {}", e)))
    }

    async fn list(&self, kind: ResourceKind, filter: &ListFilter) -> RemoteResult<Vec<RemoteResource>> {
        let query: Vec<(String, &str)> = filter
            .criteria()
            .map(|(field, value)| (format!("filter_{}", field), value))
            .collect();

        tracing::debug!(kind = %kind, filters = query.len(), "LIST");
        let value = self
            .send(self.client.get(self.collection_url(kind)).query(&query))
            .await?;
        let Value::Array(items) = value else {
            return Err(RemoteError::transport(
                "Invalid list response: body is not an array",
            ));
        };
        items.into_iter().map(decode_resource).collect()
    }

    async fn lookup(
        &self,
        source: DataSourceKind,
        filter: &ListFilter,
        count: usize,
    ) -> RemoteResult<Vec<InfraRecord>> {
        let query = self.lookup_query(source, filter, count);

        tracing::debug!(source = %source, filters = query.len(), "LOOKUP");
        let value = self
            .send(self.client.get(self.catalogue_url(source)).query(&query))
            .await?;
        let Value::Array(items) = value else {
            return Err(RemoteError::transport(
                "Invalid lookup response: body is not an array",
            ));
        };
        items
            .into_iter()
            .map(|item| InfraRecord::from_json(item).map_err(RemoteError::transport))
            .collect()
    }

    fn plane_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for the `http` control plane
pub struct HttpControlPlaneFactory;

#[async_trait]
impl ControlPlaneFactory for HttpControlPlaneFactory {
    async fn create(&self, config: &ControlPlaneConfig) -> Result<Arc<dyn ControlPlane>> {
        match config {
            ControlPlaneConfig::Http {
                api_endpoint,
                api_access_token,
                path_prefix,
                zone_id,
            } => {
                config.validate()?;
                let plane = HttpControlPlane::connect(
                    api_endpoint.clone(),
                    api_access_token.clone(),
                    path_prefix.clone(),
                    zone_id.clone(),
                )
                .await?;
                Ok(Arc::new(plane))
            }
            _ => Err(Error::config("Invalid config for http control plane")),
        }
    }
}

/// Register the HTTP control plane with a registry
///
/// # Example
///
/// ```rust
/// use eci_core::ControlPlaneRegistry;
///
/// let registry = ControlPlaneRegistry::new();
/// eci_control_plane_http::register(&registry);
/// assert!(registry.has_control_plane("http"));
/// ```
pub fn register(registry: &ControlPlaneRegistry) {
    registry.register_control_plane("http", Box::new(HttpControlPlaneFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(token: &str) -> Result<HttpControlPlane> {
        HttpControlPlane::with_organization(
            "https://portal.example.com/",
            token,
            "/api",
            "zone-1",
            "org-1",
        )
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(plane(""), Err(Error::Config(_))));
    }

    #[test]
    fn api_access_token_not_exposed_in_debug() {
        let plane = plane("secret_token_12345").unwrap();
        let debug_str = format!("{:?}", plane);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("HttpControlPlane"));
    }

    #[test]
    fn urls_are_built_from_descriptor_paths() {
        let plane = plane("token").unwrap();
        assert_eq!(
            plane.item_url(ResourceKind::Subnet, "subnet-1"),
            "https://portal.example.com/api/resource/network/subnet/subnet-1"
        );
        assert_eq!(
            plane.collection_url(ResourceKind::VirtualNetwork),
            "https://portal.example.com/api/user/resource/network/virtual_network"
        );
    }

    #[test]
    fn catalogue_urls_and_scoping() {
        let plane = plane("token").unwrap();
        assert_eq!(
            plane.catalogue_url(DataSourceKind::Region),
            "https://portal.example.com/api/user/region"
        );
        assert_eq!(
            plane.catalogue_url(DataSourceKind::BlockStorageImage),
            "https://portal.example.com/api/user/infra/block_storage_image"
        );

        let filter = ListFilter::new().with("name_ilike", "standard-4");
        let query = plane.lookup_query(DataSourceKind::InstanceType, &filter, 2);
        let has = |k: &str, v: &str| query.iter().any(|(qk, qv)| qk == k && qv == v);
        assert!(has("filter_name_ilike", "standard-4"));
        assert!(has("filter_activated", "true"));
        assert!(has("filter_zone_id", "zone-1"));
        assert!(has("count", "2"));

        let query = plane.lookup_query(DataSourceKind::Region, &filter, 2);
        assert!(!query.iter().any(|(k, _)| k == "filter_zone_id"));
    }

    #[test]
    fn error_body_becomes_api_error() {
        let body = br#"{"code":"unexpected_status","message":"nope","detail":{"resource_subnet":{"status":"deleted"}}}"#;
        let err = error_from_response(StatusCode::CONFLICT, body);
        let api = err.api().cloned().unwrap();
        assert_eq!(api.http_code, 409);
        assert!(api.is_code("unexpected_status"));
        assert_eq!(api.detail_status("resource_subnet"), Some("deleted"));
    }

    #[test]
    fn non_object_detail_is_dropped() {
        let body = br#"{"code":"invalid","message":"bad","detail":["x"]}"#;
        let err = error_from_response(StatusCode::BAD_REQUEST, body);
        assert_eq!(err.api().and_then(|a| a.detail.clone()), None);
    }

    #[test]
    fn unparsable_error_body_is_transport() {
        let err = error_from_response(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>");
        assert!(matches!(err, RemoteError::Transport(msg) if msg.contains("502")));
    }

    #[test]
    fn register_installs_http_factory() {
        let registry = ControlPlaneRegistry::new();
        register(&registry);
        assert!(registry.has_control_plane("http"));
    }
}
