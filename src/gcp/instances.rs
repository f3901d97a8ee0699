//! Compute Engine instance provider
//!
//! Registered as `gcp_compute_instance`. Identifier lookups GET the instance by
//! name in the configured zone; filter lookups list instances with a server-side
//! `filter` expression, following `nextPageToken`. Zone `all` switches both to
//! the aggregated API.

use super::client::{with_query, GcpClient, GcpSettings};
use crate::error::BackendError;
use crate::resource::{Fetched, Filter, Query, ResourceProvider};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

pub const RESOURCE_TYPE: &str = "gcp_compute_instance";
pub const DISPLAY_NAME: &str = "Compute Instance";

/// Give up on a listing that needs more requests than this
pub const MAX_PAGES: usize = 100;

/// Provider backed by the Compute Engine REST API
pub struct ComputeInstanceProvider {
    settings: GcpSettings,
    client: OnceCell<GcpClient>,
}

impl ComputeInstanceProvider {
    /// Use an already-built client
    pub fn new(client: GcpClient) -> Self {
        let settings = GcpSettings::new(client.project_id.clone(), client.zone.clone());
        Self {
            settings,
            client: OnceCell::new_with(Some(client)),
        }
    }

    /// Build the client (and resolve credentials) on first use
    pub fn lazy(settings: GcpSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&GcpClient, BackendError> {
        self.client
            .get_or_try_init(|| GcpClient::new(self.settings.clone()))
            .await
    }

    async fn get_by_name(&self, client: &GcpClient, name: &str) -> Result<Fetched, BackendError> {
        if client.is_all_zones() {
            let mut filter = Filter::new();
            filter.insert("name".to_string(), Value::String(name.to_string()));
            return self.list(client, &filter).await;
        }

        let url = format!(
            "{}/{}",
            client.compute_zonal_url("instances"),
            urlencoding::encode(name)
        );
        Ok(match client.get(&url).await? {
            Some(item) => Fetched::Found(post_process_item(item)),
            None => Fetched::NotFound,
        })
    }

    async fn list(&self, client: &GcpClient, filter: &Filter) -> Result<Fetched, BackendError> {
        let expression = filter_expression(filter);
        let base = if client.is_all_zones() {
            client.compute_aggregated_url("instances")
        } else {
            client.compute_zonal_url("instances")
        };

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let url = with_query(
                &base,
                &[
                    ("filter", expression.as_str()),
                    ("pageToken", page_token.as_deref().unwrap_or("")),
                ],
            )?;

            // A 404 on a list means the zone or project does not exist
            let Some(response) = client.get(&url).await? else {
                return Err(BackendError::Http {
                    status: 404,
                    message: format!("No such zone or project for {}", base),
                });
            };

            let page = if client.is_all_zones() {
                flatten_aggregated_response(&response)
            } else {
                response
                    .get("items")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default()
            };
            items.extend(page.into_iter().map(post_process_item));

            page_token = response
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if page_token.is_none() {
                return Ok(Fetched::Many(items));
            }
        }

        // A partial listing would make counts wrong
        tracing::warn!("Stopped listing {} after {} pages", base, MAX_PAGES);
        Err(BackendError::Other(format!(
            "listing truncated after {} pages",
            MAX_PAGES
        )))
    }
}

#[async_trait]
impl ResourceProvider for ComputeInstanceProvider {
    async fn fetch(&self, query: &Query) -> Result<Fetched, BackendError> {
        let client = self.client().await?;
        match query {
            Query::Identifier(name) => self.get_by_name(client, name).await,
            Query::Filter(filter) => self.list(client, filter).await,
        }
    }
}

/// Compute API filter syntax: `(key = "value") AND (...)`; arrays become ORs
pub fn filter_expression(filter: &Filter) -> String {
    filter
        .iter()
        .map(|(key, value)| match value {
            Value::Array(options) => {
                let alternatives: Vec<String> =
                    options.iter().map(|o| clause(key, o)).collect();
                format!("({})", alternatives.join(" OR "))
            }
            other => clause(key, other),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn clause(key: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!(
            "({} = \"{}\")",
            key,
            s.replace('\\', "\\\\").replace('"', "\\\"")
        ),
        other => format!("({} = {})", key, other),
    }
}

/// Aggregated responses look like `{ "items": { "zones/x": { "instances": [...] } } }`
fn flatten_aggregated_response(response: &Value) -> Vec<Value> {
    let Some(scopes) = response.get("items").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    scopes
        .values()
        .filter_map(|scope| scope.get("instances").and_then(|v| v.as_array()))
        .flat_map(|instances| instances.iter().cloned())
        .collect()
}

/// Add short names for URL-valued fields so profiles can match on them
fn post_process_item(mut item: Value) -> Value {
    if let Value::Object(ref mut map) = item {
        for field in ["zone", "machineType"] {
            let short = map
                .get(field)
                .and_then(|v| v.as_str())
                .map(|url| url.rsplit('/').next().unwrap_or(url).to_string());
            if let Some(short) = short {
                map.insert(format!("{}_short", field), Value::String(short));
            }
        }
    }
    item
}
