//! REST client for a Salesforce-style org

use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::models::{ApiError, CollectionRequest, QueryResponse, SaveResult};
use super::soql::{key_from_row, key_lookup_query};
use crate::api::client::{RecordResult, TargetStoreClient};
use crate::config::TargetConfig;
use crate::schema::EntityTypeDescriptor;
use crate::transfer::{NaturalKey, ResolvedRecord, SymbolicRef, TargetId};

/// Environment variable holding the org URL (overrides the config file)
pub const INSTANCE_URL_VAR: &str = "CATALOG_MIGRATE_INSTANCE_URL";
/// Environment variable holding the OAuth access token
pub const ACCESS_TOKEN_VAR: &str = "CATALOG_MIGRATE_ACCESS_TOKEN";

/// Connection settings
#[derive(Debug, Clone)]
pub struct SalesforceConfig {
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
    /// Records per composite request (the API caps this at 200)
    pub batch_size: usize,
    /// Natural keys per lookup query
    pub query_chunk_size: usize,
}

impl SalesforceConfig {
    /// Combine the `[target]` config section with credentials from the environment
    pub fn from_env(target: &TargetConfig) -> Result<Self> {
        let instance_url = std::env::var(INSTANCE_URL_VAR)
            .ok()
            .or_else(|| target.instance_url.clone())
            .with_context(|| {
                format!(
                    "No instance URL: set {} or target.instance_url in the config file",
                    INSTANCE_URL_VAR
                )
            })?;
        let access_token = std::env::var(ACCESS_TOKEN_VAR)
            .with_context(|| format!("{} is not set", ACCESS_TOKEN_VAR))?;

        Ok(SalesforceConfig {
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version: target.api_version.clone(),
            batch_size: target.batch_size.clamp(1, 200),
            query_chunk_size: target.query_chunk_size.max(1),
        })
    }
}

/// Client for the REST data API
pub struct SalesforceClient {
    config: SalesforceConfig,
    http: Client,
}

impl SalesforceClient {
    pub fn new(config: SalesforceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(SalesforceClient { config, http })
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/{}/{}",
            self.config.instance_url,
            self.config.api_version,
            path.trim_start_matches('/')
        )
    }

    /// Run a SOQL query, following `nextRecordsUrl` until done
    async fn query_all(&self, soql: &str) -> Result<Vec<serde_json::Value>> {
        log::debug!("SOQL: {}", soql);

        let first = self
            .http
            .get(self.data_url("query"))
            .bearer_auth(&self.config.access_token)
            .query(&[("q", soql)])
            .send()
            .await
            .context("Query request failed")?;
        let mut page: QueryResponse = parse_response(first).await?;
        let mut rows = std::mem::take(&mut page.records);

        while let Some(next) = page.next_records_url.take().filter(|_| !page.done) {
            let response = self
                .http
                .get(format!("{}{}", self.config.instance_url, next))
                .bearer_auth(&self.config.access_token)
                .send()
                .await
                .context("Query page request failed")?;
            page = parse_response(response).await?;
            rows.append(&mut page.records);
        }

        Ok(rows)
    }

    /// Send one composite sobjects request
    async fn send_collection(
        &self,
        method: reqwest::Method,
        records: Vec<serde_json::Value>,
    ) -> Result<Vec<SaveResult>> {
        let expected = records.len();
        let body = CollectionRequest {
            all_or_none: false,
            records,
        };

        let response = self
            .http
            .request(method, self.data_url("composite/sobjects"))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .context("Composite request failed")?;
        let results: Vec<SaveResult> = parse_response(response).await?;

        if results.len() != expected {
            anyhow::bail!(
                "Composite response has {} results for {} records",
                results.len(),
                expected
            );
        }
        Ok(results)
    }
}

#[async_trait]
impl TargetStoreClient for SalesforceClient {
    async fn query(
        &self,
        descriptor: &EntityTypeDescriptor,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, TargetId>> {
        let mut found = HashMap::new();

        for chunk in keys.chunks(self.config.query_chunk_size) {
            let soql = key_lookup_query(descriptor, chunk);
            let rows = self
                .query_all(&soql)
                .await
                .with_context(|| format!("Failed to look up existing {} records", descriptor.name))?;

            for row in rows {
                let Some(id) = row.get("Id").and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Some(key) = key_from_row(descriptor, &row) {
                    found.insert(key, TargetId::new(id));
                }
            }
        }

        log::debug!(
            "{}: {} of {} keys already exist",
            descriptor.name,
            found.len(),
            keys.len()
        );
        Ok(found)
    }

    async fn bulk_create(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[ResolvedRecord],
    ) -> Result<Vec<RecordResult>> {
        let mut assigned: HashMap<SymbolicRef, TargetId> = HashMap::new();
        let mut results = Vec::with_capacity(records.len());

        for range in chunk_ranges(records, self.config.batch_size) {
            let mut payloads = Vec::new();
            let mut sent = Vec::new();
            let mut chunk_results: Vec<Option<RecordResult>> = Vec::new();

            for record in &records[range] {
                let mut record = record.clone();
                record.substitute_refs(&assigned);
                if let Some((field, token)) = record.first_pending_ref() {
                    // Its token's record failed in an earlier chunk
                    chunk_results.push(Some(RecordResult::failure(
                        Some(field.as_str()),
                        format!("Referenced record {} was not created", token),
                    )));
                    continue;
                }
                payloads.push(sobject_payload(descriptor, &record, None));
                sent.push(record.token());
                chunk_results.push(None);
            }

            let saved = if payloads.is_empty() {
                Vec::new()
            } else {
                self.send_collection(reqwest::Method::POST, payloads)
                    .await
                    .with_context(|| format!("Failed to create {} records", descriptor.name))?
            };

            let mut saved = saved.into_iter().zip(sent);
            for slot in chunk_results {
                if let Some(result) = slot {
                    results.push(result);
                    continue;
                }
                let Some((save, token)) = saved.next() else {
                    anyhow::bail!("Composite response ended early for {}", descriptor.name);
                };
                let result = save_result(save);
                if let RecordResult::Success(id) = &result {
                    assigned.insert(token, id.clone());
                }
                results.push(result);
            }
        }

        Ok(results)
    }

    async fn bulk_update(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[(TargetId, ResolvedRecord)],
    ) -> Result<Vec<RecordResult>> {
        let mut results = Vec::with_capacity(records.len());

        for chunk in records.chunks(self.config.batch_size) {
            let payloads = chunk
                .iter()
                .map(|(id, record)| sobject_payload(descriptor, record, Some(id)))
                .collect();
            let saved = self
                .send_collection(reqwest::Method::PATCH, payloads)
                .await
                .with_context(|| format!("Failed to update {} records", descriptor.name))?;
            results.extend(saved.into_iter().map(save_result));
        }

        Ok(results)
    }
}

/// Split records into request chunks of at most `batch_size`.
///
/// A chunk also ends before a record whose symbolic reference points at a
/// record of the same chunk, since ids are only known once a chunk returns.
pub fn chunk_ranges(records: &[ResolvedRecord], batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;

    for (idx, record) in records.iter().enumerate() {
        let full = idx - start >= batch_size;
        let needs_earlier = records[start..idx]
            .iter()
            .any(|r| record.symbolic_refs().any(|(_, token)| token == &r.token()));
        if idx > start && (full || needs_earlier) {
            ranges.push(start..idx);
            start = idx;
        }
    }
    if start < records.len() {
        ranges.push(start..records.len());
    }
    ranges
}

/// JSON body for one record; creates omit nulls, updates send them to clear fields
fn sobject_payload(
    descriptor: &EntityTypeDescriptor,
    record: &ResolvedRecord,
    id: Option<&TargetId>,
) -> serde_json::Value {
    let mut object = record.to_json(id.is_none());
    object.insert(
        "attributes".to_string(),
        serde_json::json!({ "type": descriptor.name }),
    );
    if let Some(id) = id {
        object.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    }
    serde_json::Value::Object(object)
}

fn save_result(save: SaveResult) -> RecordResult {
    match (save.success, save.id) {
        (true, Some(id)) => RecordResult::Success(TargetId::new(id)),
        _ => {
            let error = save.errors.into_iter().next();
            let field = error.as_ref().and_then(|e| e.fields.first().cloned());
            let message = error
                .map(|e| format!("{}: {}", e.status_code, e.message))
                .unwrap_or_else(|| "Unknown error".to_string());
            RecordResult::Failure { field, message }
        }
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    if !status.is_success() {
        let detail = serde_json::from_str::<Vec<ApiError>>(&body)
            .ok()
            .and_then(|errors| errors.into_iter().next())
            .map(|e| format!("{}: {}", e.error_code, e.message))
            .unwrap_or(body);
        anyhow::bail!("HTTP {}: {}", status, detail);
    }

    serde_json::from_str(&body).with_context(|| format!("Unexpected response body: {}", body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::builtin_registry;
    use crate::transfer::{StagedRecord, Value};

    fn category(seq: usize, parent: Option<usize>) -> ResolvedRecord {
        let mut staged = StagedRecord::new("ProductCategory", seq).with_field("Code", format!("C{}", seq));
        if let Some(parent) = parent {
            staged = staged.with_field(
                "ParentCategoryId",
                Value::Ref(SymbolicRef::new("ProductCategory", parent)),
            );
        }
        ResolvedRecord::from_staged(&staged, None)
    }

    #[test]
    fn test_chunks_respect_batch_size() {
        let records: Vec<_> = (1..=5).map(|seq| category(seq, None)).collect();
        assert_eq!(chunk_ranges(&records, 2), vec![0..2, 2..4, 4..5]);
        assert!(chunk_ranges(&[], 2).is_empty());
    }

    #[test]
    fn test_chunk_ends_before_same_chunk_token() {
        let records = vec![
            category(1, None),
            category(2, None),
            category(3, Some(1)),
            category(4, Some(3)),
            category(5, None),
        ];
        assert_eq!(chunk_ranges(&records, 200), vec![0..2, 2..3, 3..5]);
    }

    #[test]
    fn test_payloads() {
        let registry = builtin_registry().unwrap();
        let descriptor = registry.describe("ProductCategory").unwrap();
        let mut record = category(1, None);
        record.set_field("Description", Value::Null);

        let create = sobject_payload(descriptor, &record, None);
        assert_eq!(create["attributes"]["type"], "ProductCategory");
        assert!(create.get("Description").is_none());
        assert!(create.get("id").is_none());

        let update = sobject_payload(descriptor, &record, Some(&TargetId::new("0ZG1")));
        assert_eq!(update["id"], "0ZG1");
        assert_eq!(update["Description"], serde_json::Value::Null);
    }

    #[test]
    fn test_save_result_failure_carries_field() {
        let save: SaveResult = serde_json::from_value(serde_json::json!({
            "success": false,
            "errors": [{ "statusCode": "FIELD_INTEGRITY_EXCEPTION", "message": "bad", "fields": ["CatalogId"] }]
        }))
        .unwrap();

        assert_eq!(
            save_result(save),
            RecordResult::Failure {
                field: Some("CatalogId".into()),
                message: "FIELD_INTEGRITY_EXCEPTION: bad".into()
            }
        );
    }

    #[test]
    fn test_config_requires_token() {
        let target = TargetConfig {
            instance_url: Some("https://example.my.salesforce.com/".into()),
            ..TargetConfig::default()
        };
        if std::env::var(ACCESS_TOKEN_VAR).is_err() {
            assert!(SalesforceConfig::from_env(&target).is_err());
        }
    }
}
