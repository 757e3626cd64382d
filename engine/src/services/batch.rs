//! Batch bundle processing.
//!
//! Unlike transactions, batch entries are independent: each commits or
//! fails on its own, failures become per-entry OperationOutcome responses,
//! and references between entries are not resolved.

use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::{
    models::{Bundle, BundleEntry, BundleEntryResponse, BundleType, ResourceOperation, CreateParams, UpdateParams},
    search::SearchEngine,
    Error, Result,
};

use super::conditional::{parse_form_urlencoded, query_from_url};
use super::crud::CrudService;
use super::{parse_etag, status_line, ParsedUrl};

/// `Prefer: return=` preference for write responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreferReturn {
    /// Status, location, and etag only.
    Minimal,
    /// Full resource body.
    #[default]
    Representation,
    /// An OperationOutcome in `entry.response.outcome`.
    OperationOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct BundleRequestOptions {
    pub prefer_return: PreferReturn,
    pub base_url: Option<String>,
}

pub struct BatchService {
    crud: Arc<CrudService>,
    search: Arc<SearchEngine>,
}

impl BatchService {
    pub fn new(crud: Arc<CrudService>, search: Arc<SearchEngine>) -> Self {
        Self { crud, search }
    }

    /// Process a batch bundle; always returns a batch-response bundle, with
    /// per-entry statuses.
    pub async fn process(
        &self,
        bundle_json: JsonValue,
        options: BundleRequestOptions,
    ) -> Result<JsonValue> {
        let bundle: Bundle = serde_json::from_value(bundle_json)
            .map_err(|e| Error::InvalidResource(format!("Invalid Bundle: {}", e)))?;

        if bundle.bundle_type != BundleType::Batch {
            return Err(Error::InvalidResource(format!(
                "Unsupported Bundle type: {:?}. BatchService requires type 'batch'",
                bundle.bundle_type
            )));
        }

        let entries = bundle.entry.unwrap_or_default();
        let mut response_entries = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let response = match self.process_entry(entry, index, &options).await {
                Ok(response) => response,
                Err(err) => error_entry(&err),
            };
            response_entries.push(response);
        }

        let mut response = Bundle::new(BundleType::BatchResponse);
        response.entry = Some(response_entries);
        serde_json::to_value(response)
            .map_err(|e| Error::Internal(format!("Failed to serialize response bundle: {}", e)))
    }

    async fn process_entry(
        &self,
        entry: &BundleEntry,
        index: usize,
        options: &BundleRequestOptions,
    ) -> Result<BundleEntry> {
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Batch entry {} missing request", index))
        })?;
        let method = request.method.to_uppercase();
        let parsed_url = ParsedUrl::parse(&request.url);
        let query_items = query_from_url(&request.url)
            .map(parse_form_urlencoded)
            .transpose()?
            .unwrap_or_default();

        match method.as_str() {
            "GET" => {
                let resource_type = parsed_url.resource_type.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Batch entry {} GET missing resource type", index))
                })?;
                match &parsed_url.resource_id {
                    Some(id) => {
                        let resource = self.crud.read(&resource_type, id).await?;
                        Ok(BundleEntry {
                            full_url: Some(resource.identity()),
                            response: Some(BundleEntryResponse {
                                status: status_line(200),
                                location: None,
                                etag: Some(resource.etag()),
                                last_modified: Some(resource.last_updated.to_rfc3339()),
                                outcome: None,
                            }),
                            resource: Some(resource.resource),
                            ..Default::default()
                        })
                    }
                    None => {
                        let result = self
                            .search
                            .search_bundle(&resource_type, &query_items)
                            .await?;
                        Ok(BundleEntry {
                            response: Some(BundleEntryResponse {
                                status: status_line(200),
                                location: None,
                                etag: None,
                                last_modified: None,
                                outcome: None,
                            }),
                            resource: Some(serde_json::to_value(result).map_err(|e| {
                                Error::Internal(format!("Failed to serialize searchset: {}", e))
                            })?),
                            ..Default::default()
                        })
                    }
                }
            }
            "POST" => {
                let resource_type = parsed_url.resource_type.ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Batch entry {} POST missing resource type",
                        index
                    ))
                })?;
                let resource = entry.resource.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Batch entry {} POST missing resource", index))
                })?;
                let result = self
                    .crud
                    .create(
                        &resource_type,
                        resource,
                        Some(CreateParams {
                            if_none_exist: request.if_none_exist.clone(),
                        }),
                    )
                    .await?;
                let status = match result.operation {
                    ResourceOperation::Created => 201,
                    _ => 200,
                };
                Ok(write_entry(status, result, options.prefer_return))
            }
            "PUT" => {
                let resource_type = parsed_url.resource_type.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Batch entry {} PUT missing resource type", index))
                })?;
                let resource = entry.resource.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Batch entry {} PUT missing resource", index))
                })?;
                let params = Some(UpdateParams {
                    if_match: request.if_match.as_deref().and_then(parse_etag),
                });

                let result = match &parsed_url.resource_id {
                    Some(id) => self.crud.update(&resource_type, id, resource, params).await?,
                    None => {
                        self.crud
                            .conditional_update(&resource_type, &query_items, resource, params)
                            .await?
                    }
                };
                let status = match result.operation {
                    ResourceOperation::Created => 201,
                    _ => 200,
                };
                Ok(write_entry(status, result, options.prefer_return))
            }
            "PATCH" => {
                let resource_type = parsed_url.resource_type.clone().ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Batch entry {} PATCH missing resource type",
                        index
                    ))
                })?;
                let id = parsed_url.resource_id.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Batch entry {} PATCH missing resource id", index))
                })?;
                let payload = entry.resource.clone().ok_or_else(|| {
                    Error::InvalidResource(format!("Batch entry {} PATCH missing resource", index))
                })?;
                let patch = super::transaction::parse_patch_payload(&payload)?;
                let params = Some(UpdateParams {
                    if_match: request.if_match.as_deref().and_then(parse_etag),
                });
                let result = self.crud.patch(&resource_type, &id, patch, params).await?;
                Ok(write_entry(200, result, options.prefer_return))
            }
            "DELETE" => {
                let resource_type = parsed_url.resource_type.clone().ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Batch entry {} DELETE missing resource type",
                        index
                    ))
                })?;
                let version_id = match &parsed_url.resource_id {
                    Some(id) => self.crud.delete(&resource_type, id).await?,
                    None => self
                        .crud
                        .conditional_delete(
                            &resource_type,
                            &query_items,
                            crate::models::ConditionalDeleteMode::Single,
                        )
                        .await?
                        .first()
                        .map(|(_, v)| *v),
                };
                Ok(BundleEntry {
                    response: Some(BundleEntryResponse {
                        status: status_line(204),
                        location: None,
                        etag: version_id.map(|v| format!("W/\"{}\"", v)),
                        last_modified: None,
                        outcome: None,
                    }),
                    ..Default::default()
                })
            }
            other => Err(Error::InvalidResource(format!(
                "Unsupported HTTP method in batch: {}",
                other
            ))),
        }
    }
}

fn write_entry(
    status: u16,
    result: crate::models::ResourceResult,
    prefer_return: PreferReturn,
) -> BundleEntry {
    let written = result.resource;
    BundleEntry {
        response: Some(BundleEntryResponse {
            status: status_line(status),
            location: Some(format!(
                "{}/{}/_history/{}",
                written.resource_type, written.id, written.version_id
            )),
            etag: Some(written.etag()),
            last_modified: Some(written.last_updated.to_rfc3339()),
            outcome: None,
        }),
        resource: match prefer_return {
            PreferReturn::Representation => Some(written.resource),
            _ => None,
        },
        ..Default::default()
    }
}

/// A failed batch entry: per-entry status plus the error's outcome.
fn error_entry(err: &Error) -> BundleEntry {
    BundleEntry {
        response: Some(BundleEntryResponse {
            status: status_line(err.status_code()),
            location: None,
            etag: None,
            last_modified: None,
            outcome: Some(err.operation_outcome()),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_entries_carry_status_and_outcome() {
        let err = Error::ResourceNotFound {
            resource_type: "Patient".into(),
            id: "x".into(),
        };
        let entry = error_entry(&err);
        let response = entry.response.unwrap();
        assert_eq!(response.status, "404 Not Found");
        let outcome = response.outcome.unwrap();
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        assert_eq!(outcome["issue"][0]["code"], "not-found");
    }
}
