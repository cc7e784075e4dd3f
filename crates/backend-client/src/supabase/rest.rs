//! Table access through PostgREST.

use super::{check_response, SupabaseClient};
use crate::{BackendResult, Query, TableApi};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// `Accept` value asking PostgREST for exactly one object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

impl SupabaseClient {
    async fn rest_request(
        &self,
        method: reqwest::Method,
        table: &str,
        params: &[(String, String)],
    ) -> BackendResult<reqwest::RequestBuilder> {
        let url = self.rest_url(table);
        debug!(method = %method, url = %url, params = ?params, "Table request");

        Ok(self
            .http_client
            .request(method, &url)
            .query(params)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer_token().await?)))
    }

    fn write_params(query: &Query) -> Vec<(String, String)> {
        let mut params = query.to_filter_params();
        params.push(("select".to_string(), "*".to_string()));
        params
    }
}

#[async_trait]
impl TableApi for SupabaseClient {
    async fn select(&self, table: &str, query: &Query) -> BackendResult<Vec<Value>> {
        let response = self
            .rest_request(reqwest::Method::GET, table, &query.to_params())
            .await?
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = check_response(response, "select").await?;

        let rows: Vec<Value> = response.json().await?;
        debug!(table, rows = rows.len(), "Selected rows");
        Ok(rows)
    }

    async fn select_single(&self, table: &str, query: &Query) -> BackendResult<Value> {
        let response = self
            .rest_request(reqwest::Method::GET, table, &query.to_params())
            .await?
            .header("Accept", SINGLE_OBJECT)
            .send()
            .await?;
        let response = check_response(response, "select single").await?;
        Ok(response.json().await?)
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Value> {
        let params = vec![("select".to_string(), "*".to_string())];
        let response = self
            .rest_request(reqwest::Method::POST, table, &params)
            .await?
            .header("Accept", SINGLE_OBJECT)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let response = check_response(response, "insert").await?;
        Ok(response.json().await?)
    }

    async fn update(&self, table: &str, query: &Query, patch: Value) -> BackendResult<Vec<Value>> {
        let response = self
            .rest_request(reqwest::Method::PATCH, table, &Self::write_params(query))
            .await?
            .header("Accept", "application/json")
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let response = check_response(response, "update").await?;

        let rows: Vec<Value> = response.json().await?;
        debug!(table, rows = rows.len(), "Updated rows");
        Ok(rows)
    }

    async fn update_single(&self, table: &str, query: &Query, patch: Value) -> BackendResult<Value> {
        let response = self
            .rest_request(reqwest::Method::PATCH, table, &Self::write_params(query))
            .await?
            .header("Accept", SINGLE_OBJECT)
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let response = check_response(response, "update single").await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, table: &str, query: &Query) -> BackendResult<()> {
        let response = self
            .rest_request(reqwest::Method::DELETE, table, &query.to_filter_params())
            .await?
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        check_response(response, "delete").await?;
        Ok(())
    }
}
