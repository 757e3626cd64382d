//! Transaction bundle processing.
//!
//! Entries execute inside one store transaction in FHIR's canonical order
//! (DELETE, POST, PUT/PATCH, GET), with `fullUrl` placeholders rewritten to
//! their assigned identities before anything touches the store. Any entry
//! failure rolls the whole transaction back.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::{PgResourceStore, StoreTransaction},
    models::{Bundle, BundleEntry, BundleEntryResponse, BundleType},
    notify::{ChangeEvent, ChangeKind, ChangeNotifier},
    search::SearchEngine,
    Error, Result,
};

use super::batch::{BundleRequestOptions, PreferReturn};
use super::conditional::{parse_form_urlencoded, query_from_url};
use super::{next_version_for, parse_etag, populate_meta, status_line, ParsedUrl};

pub struct TransactionService {
    store: PgResourceStore,
    search: Arc<SearchEngine>,
    notifier: ChangeNotifier,
    allow_update_create: bool,
}

impl TransactionService {
    pub fn new(
        store: PgResourceStore,
        search: Arc<SearchEngine>,
        notifier: ChangeNotifier,
        allow_update_create: bool,
    ) -> Self {
        Self {
            store,
            search,
            notifier,
            allow_update_create,
        }
    }

    /// Process a transaction bundle; returns the transaction-response
    /// bundle as JSON.
    pub async fn process(
        &self,
        bundle_json: JsonValue,
        options: BundleRequestOptions,
    ) -> Result<JsonValue> {
        let bundle: Bundle = serde_json::from_value(bundle_json)
            .map_err(|e| Error::InvalidResource(format!("Invalid Bundle: {}", e)))?;

        if bundle.bundle_type != BundleType::Transaction {
            return Err(Error::InvalidResource(format!(
                "Unsupported Bundle type: {:?}. TransactionService requires type 'transaction'",
                bundle.bundle_type
            )));
        }

        let (response, events) = self.process_transaction(bundle, &options).await?;

        // Only after a successful commit do the writes become observable.
        for event in events {
            self.notifier.publish(event);
        }

        serde_json::to_value(response)
            .map_err(|e| Error::Internal(format!("Failed to serialize response bundle: {}", e)))
    }

    async fn process_transaction(
        &self,
        bundle: Bundle,
        options: &BundleRequestOptions,
    ) -> Result<(Bundle, Vec<ChangeEvent>)> {
        let entries = bundle.entry.unwrap_or_default();

        // A transaction with no entries is valid and commits nothing.
        if entries.is_empty() {
            let mut response = Bundle::new(BundleType::TransactionResponse);
            response.entry = Some(Vec::new());
            return Ok((response, Vec::new()));
        }

        validate_transaction_bundle(&entries)?;
        let (delete_indices, post_indices, put_patch_indices, get_indices) =
            partition_transaction_entries(&entries)?;
        check_identity_overlaps(&entries, &delete_indices, &post_indices, &put_patch_indices)?;

        let mut rewriter = UrlRewriter::new();
        rewriter.seed_non_post_mappings(&entries);
        rewriter.reserve_post_ids(&entries, &post_indices)?;

        let mut tx = self.store.begin().await?;

        // Take every known target's logical lock up front, in sorted order,
        // so concurrent transactions touching the same resources cannot
        // deadlock. Conditional targets resolve later and lock at write time.
        let mut lock_targets = known_targets(&entries, &rewriter);
        tx.lock_all(&mut lock_targets).await?;

        let mut response_entries = vec![BundleEntry::default(); entries.len()];
        let mut events: Vec<ChangeEvent> = Vec::new();

        let ordered: Vec<usize> = delete_indices
            .iter()
            .chain(&post_indices)
            .chain(&put_patch_indices)
            .chain(&get_indices)
            .copied()
            .collect();

        for index in ordered {
            match self
                .process_entry(&mut tx, &entries[index], index, &mut rewriter, &mut events, options)
                .await
            {
                Ok(response) => response_entries[index] = response,
                Err(err) => {
                    let _ = tx.rollback().await;
                    return Err(with_entry_context(err, index));
                }
            }
        }

        tx.commit().await?;

        let mut response = Bundle::new(BundleType::TransactionResponse);
        response.entry = Some(response_entries);
        Ok((response, events))
    }

    async fn process_entry(
        &self,
        tx: &mut StoreTransaction,
        entry: &BundleEntry,
        index: usize,
        rewriter: &mut UrlRewriter,
        events: &mut Vec<ChangeEvent>,
        options: &BundleRequestOptions,
    ) -> Result<BundleEntry> {
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Transaction entry {} missing request", index))
        })?;

        let method = request.method.to_uppercase();
        let parsed_url = ParsedUrl::parse(&request.url);
        let query_items = query_from_url(&request.url)
            .map(parse_form_urlencoded)
            .transpose()?
            .unwrap_or_default();

        match method.as_str() {
            "DELETE" => {
                self.process_delete(tx, request, parsed_url, query_items, index, events, options)
                    .await
            }
            "POST" => {
                self.process_post(tx, entry, request, parsed_url, index, rewriter, events, options)
                    .await
            }
            "PUT" | "PATCH" => {
                self.process_put_patch(
                    tx, entry, &method, request, parsed_url, query_items, index, rewriter, events,
                    options,
                )
                .await
            }
            "GET" | "HEAD" => {
                self.process_get(tx, &method, parsed_url, query_items, options)
                    .await
            }
            other => Err(Error::InvalidResource(format!(
                "Unsupported HTTP method in transaction: {}",
                other
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_delete(
        &self,
        tx: &mut StoreTransaction,
        request: &crate::models::BundleEntryRequest,
        parsed_url: ParsedUrl,
        query_items: Vec<(String, String)>,
        index: usize,
        events: &mut Vec<ChangeEvent>,
        options: &BundleRequestOptions,
    ) -> Result<BundleEntry> {
        let (resource_type, resource_id) = match (&parsed_url.resource_type, &parsed_url.resource_id)
        {
            (Some(rt), Some(id)) => (rt.clone(), id.clone()),
            (Some(rt), None) => {
                if query_items.is_empty() {
                    return Err(Error::InvalidResource(format!(
                        "Transaction entry {} DELETE missing resource id and conditional criteria",
                        index
                    )));
                }
                let outcome = self
                    .search
                    .search(tx.conn()?, rt, &query_items)
                    .await?;
                match outcome.resources.len() {
                    // Conditional delete with no match is a successful no-op.
                    0 => return Ok(delete_response(None, options.prefer_return, rt, "")),
                    1 => (rt.clone(), outcome.resources[0].id.clone()),
                    n => {
                        return Err(Error::MultipleMatches {
                            interaction: "delete".to_string(),
                            count: n,
                        })
                    }
                }
            }
            _ => {
                return Err(Error::InvalidResource(format!(
                    "Transaction entry {} DELETE requires a resource type in request.url",
                    index
                )))
            }
        };

        if let Some(expected) = request.if_match.as_deref().and_then(parse_etag) {
            let current = tx.read(&resource_type, &resource_id).await?.ok_or_else(|| {
                Error::ResourceNotFound {
                    resource_type: resource_type.clone(),
                    id: resource_id.clone(),
                }
            })?;
            if current.version_id != expected {
                return Err(Error::VersionConflict {
                    expected,
                    actual: current.version_id,
                });
            }
        }

        let version_id = match tx.read(&resource_type, &resource_id).await? {
            None => None,
            Some(existing) if existing.deleted => Some(existing.version_id),
            Some(_) => {
                let version_id = tx.delete(&resource_type, &resource_id).await?;
                events.push(ChangeEvent {
                    resource_type: resource_type.clone(),
                    id: resource_id.clone(),
                    version_id,
                    kind: ChangeKind::Delete,
                });
                Some(version_id)
            }
        };

        Ok(delete_response(
            version_id,
            options.prefer_return,
            &resource_type,
            &resource_id,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_post(
        &self,
        tx: &mut StoreTransaction,
        entry: &BundleEntry,
        request: &crate::models::BundleEntryRequest,
        parsed_url: ParsedUrl,
        index: usize,
        rewriter: &mut UrlRewriter,
        events: &mut Vec<ChangeEvent>,
        options: &BundleRequestOptions,
    ) -> Result<BundleEntry> {
        let resource_type = parsed_url.resource_type.ok_or_else(|| {
            Error::InvalidResource(format!(
                "Transaction entry {} POST missing resource type in request.url",
                index
            ))
        })?;
        let mut resource = entry.resource.clone().ok_or_else(|| {
            Error::InvalidResource(format!("Transaction entry {} POST missing resource", index))
        })?;

        rewriter.rewrite_resource(&mut resource);

        if let Some(criteria) = request.if_none_exist.as_deref() {
            let query = criteria.trim().trim_start_matches('?');
            let items = parse_form_urlencoded(query)?;
            if items.is_empty() {
                return Err(Error::Validation(
                    "Transaction conditional create requires If-None-Exist search parameters"
                        .to_string(),
                ));
            }
            let outcome = self.search.search(tx.conn()?, &resource_type, &items).await?;
            match outcome.resources.len() {
                0 => {}
                1 => {
                    let existing = &outcome.resources[0];
                    return Ok(write_response(
                        200,
                        existing,
                        options.prefer_return,
                        "Conditional create matched an existing resource",
                    ));
                }
                n => {
                    return Err(Error::MultipleMatches {
                        interaction: "create".to_string(),
                        count: n,
                    })
                }
            }
        }

        let id = rewriter
            .reserved_post_id(index)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        populate_meta(&mut resource, &id, 1, Utc::now());

        let written = tx.upsert(&resource_type, &id, resource).await?;
        events.push(ChangeEvent {
            resource_type: written.resource_type.clone(),
            id: written.id.clone(),
            version_id: written.version_id,
            kind: ChangeKind::Create,
        });

        Ok(write_response(
            201,
            &written,
            options.prefer_return,
            "Resource created successfully",
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_put_patch(
        &self,
        tx: &mut StoreTransaction,
        entry: &BundleEntry,
        method: &str,
        request: &crate::models::BundleEntryRequest,
        parsed_url: ParsedUrl,
        query_items: Vec<(String, String)>,
        index: usize,
        rewriter: &mut UrlRewriter,
        events: &mut Vec<ChangeEvent>,
        options: &BundleRequestOptions,
    ) -> Result<BundleEntry> {
        let resource_type = parsed_url.resource_type.clone().ok_or_else(|| {
            Error::InvalidResource(format!(
                "Transaction entry {} {} missing resource type in request.url",
                index, method
            ))
        })?;

        let payload = entry.resource.clone().ok_or_else(|| {
            Error::InvalidResource(format!(
                "Transaction entry {} {} missing resource",
                index, method
            ))
        })?;

        // Resolve the target id: direct, or via conditional criteria.
        let (resource_id, conditional_matched) = match &parsed_url.resource_id {
            Some(id) => (id.clone(), false),
            None => {
                if query_items.is_empty() {
                    return Err(Error::InvalidResource(format!(
                        "Transaction entry {} {} missing resource id and conditional criteria",
                        index, method
                    )));
                }
                let outcome = self
                    .search
                    .search(tx.conn()?, &resource_type, &query_items)
                    .await?;
                match outcome.resources.len() {
                    0 => {
                        let id = payload
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_else(|| Uuid::new_v4().to_string());
                        (id, false)
                    }
                    1 => {
                        let existing = &outcome.resources[0];
                        if let Some(body_id) = payload.get("id").and_then(|v| v.as_str()) {
                            if body_id != existing.id {
                                return Err(Error::InvalidResource(format!(
                                    "Resource id '{}' does not match the conditional match '{}'",
                                    body_id, existing.id
                                )));
                            }
                        }
                        (existing.id.clone(), true)
                    }
                    n => {
                        return Err(Error::MultipleMatches {
                            interaction: "update".to_string(),
                            count: n,
                        })
                    }
                }
            }
        };

        let current = tx.read(&resource_type, &resource_id).await?;

        if let Some(expected) = request.if_match.as_deref().and_then(parse_etag) {
            let current = current.as_ref().ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.clone(),
                id: resource_id.clone(),
            })?;
            if current.version_id != expected {
                return Err(Error::VersionConflict {
                    expected,
                    actual: current.version_id,
                });
            }
        }

        let mut resource = if method == "PATCH" {
            let patch = parse_json_patch_from_binary(&payload)?;
            let current = current.as_ref().ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.clone(),
                id: resource_id.clone(),
            })?;
            if current.deleted {
                return Err(Error::ResourceDeleted {
                    resource_type: resource_type.clone(),
                    id: resource_id.clone(),
                    version_id: Some(current.version_id),
                });
            }
            let mut patched = current.resource.clone();
            json_patch::patch(&mut patched, &patch.0)
                .map_err(|e| Error::InvalidResource(e.to_string()))?;
            if let Some(obj) = patched.as_object_mut() {
                obj.insert("resourceType".to_string(), json!(resource_type));
                obj.insert("id".to_string(), json!(resource_id));
                obj.remove("text");
            }
            patched
        } else {
            let mut resource = payload;
            rewriter.rewrite_resource(&mut resource);
            if let Some(body_type) = resource.get("resourceType").and_then(|v| v.as_str()) {
                if body_type != resource_type {
                    return Err(Error::InvalidResource(format!(
                        "Resource type mismatch: expected {}, got {}",
                        resource_type, body_type
                    )));
                }
            }
            resource
        };

        let creating = current.is_none() || current.as_ref().is_some_and(|c| c.deleted);
        if creating && method == "PUT" && !self.allow_update_create && !conditional_matched {
            return Err(Error::MethodNotAllowed(
                "Server does not allow client-defined resource ids".to_string(),
            ));
        }

        populate_meta(
            &mut resource,
            &resource_id,
            next_version_for(current.as_ref()),
            Utc::now(),
        );
        let written = tx.upsert(&resource_type, &resource_id, resource).await?;
        events.push(ChangeEvent {
            resource_type: written.resource_type.clone(),
            id: written.id.clone(),
            version_id: written.version_id,
            kind: if creating {
                ChangeKind::Create
            } else {
                ChangeKind::Update
            },
        });

        Ok(write_response(
            if creating { 201 } else { 200 },
            &written,
            options.prefer_return,
            "Resource updated successfully",
        ))
    }

    async fn process_get(
        &self,
        tx: &mut StoreTransaction,
        method: &str,
        parsed_url: ParsedUrl,
        query_items: Vec<(String, String)>,
        options: &BundleRequestOptions,
    ) -> Result<BundleEntry> {
        let resource_type = parsed_url.resource_type.ok_or_else(|| {
            Error::InvalidResource("Transaction GET missing resource type".to_string())
        })?;
        let Some(resource_id) = parsed_url.resource_id else {
            // Type-level search, run on this transaction's connection so it
            // sees the entries already processed.
            let outcome = self
                .search
                .search(tx.conn()?, &resource_type, &query_items)
                .await?;
            let searchset = self.search.to_bundle(&resource_type, &query_items, outcome);
            return Ok(BundleEntry {
                response: Some(BundleEntryResponse {
                    status: status_line(200),
                    location: None,
                    etag: None,
                    last_modified: None,
                    outcome: None,
                }),
                resource: if method == "HEAD" {
                    None
                } else {
                    Some(serde_json::to_value(searchset).map_err(|e| {
                        Error::Internal(format!("Failed to serialize searchset: {}", e))
                    })?)
                },
                ..Default::default()
            });
        };

        let resource = tx
            .read(&resource_type, &resource_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.clone(),
                id: resource_id.clone(),
            })?;
        if resource.deleted {
            return Err(Error::ResourceDeleted {
                resource_type,
                id: resource_id,
                version_id: Some(resource.version_id),
            });
        }

        Ok(BundleEntry {
            full_url: Some(format!("{}/{}", resource_type, resource_id)),
            response: Some(BundleEntryResponse {
                status: status_line(200),
                location: None,
                etag: Some(resource.etag()),
                last_modified: Some(resource.last_updated.to_rfc3339()),
                outcome: None,
            }),
            resource: if method == "HEAD" {
                None
            } else {
                match options.prefer_return {
                    PreferReturn::Representation => Some(resource.resource),
                    _ => None,
                }
            },
            ..Default::default()
        })
    }
}

// =============================================================================
// Transaction helpers
// =============================================================================

fn validate_transaction_bundle(entries: &[BundleEntry]) -> Result<()> {
    let mut seen_full_urls = HashSet::new();

    for (i, entry) in entries.iter().enumerate() {
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Transaction entry {} missing request", i))
        })?;
        let method = request.method.to_uppercase();

        if (method == "POST" || method == "PUT" || method == "PATCH") && entry.resource.is_none() {
            return Err(Error::InvalidResource(format!(
                "Transaction entry {} with method {} missing resource",
                i, method
            )));
        }

        if let Some(full_url) = &entry.full_url {
            if !seen_full_urls.insert(full_url.clone()) {
                return Err(Error::InvalidResource(format!(
                    "Duplicate fullUrl in transaction at entry {}: {}",
                    i, full_url
                )));
            }
        }
    }

    Ok(())
}

type Partition = (Vec<usize>, Vec<usize>, Vec<usize>, Vec<usize>);

/// Group entry indices by method, preserving input order within each group.
fn partition_transaction_entries(entries: &[BundleEntry]) -> Result<Partition> {
    let mut delete_indices = Vec::new();
    let mut post_indices = Vec::new();
    let mut put_patch_indices = Vec::new();
    let mut get_indices = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Transaction entry {} missing request", index))
        })?;

        match request.method.to_uppercase().as_str() {
            "DELETE" => delete_indices.push(index),
            "POST" => post_indices.push(index),
            "PUT" | "PATCH" => put_patch_indices.push(index),
            "GET" | "HEAD" => get_indices.push(index),
            other => {
                return Err(Error::InvalidResource(format!(
                    "Unsupported HTTP method in transaction: {}",
                    other
                )));
            }
        }
    }

    Ok((delete_indices, post_indices, put_patch_indices, get_indices))
}

/// Two writes to the same identity in one transaction are invalid.
fn check_identity_overlaps(
    entries: &[BundleEntry],
    delete_indices: &[usize],
    post_indices: &[usize],
    put_indices: &[usize],
) -> Result<()> {
    let mut identities = HashSet::new();

    for &idx in delete_indices.iter().chain(post_indices).chain(put_indices) {
        let entry = &entries[idx];
        let request = entry.request.as_ref().ok_or_else(|| {
            Error::InvalidResource(format!("Transaction entry {} missing request", idx))
        })?;

        // POST identities are server-assigned and cannot collide.
        if request.method.to_uppercase() == "POST" {
            continue;
        }

        if let Some(identity) = ParsedUrl::parse(&request.url).identity() {
            if !identities.insert(identity.clone()) {
                return Err(Error::InvalidResource(format!(
                    "Transaction identity overlap detected for {}",
                    identity
                )));
            }
        }
    }

    Ok(())
}

/// Every `(type, id)` pair the transaction will write, for up-front locking.
fn known_targets(entries: &[BundleEntry], rewriter: &UrlRewriter) -> Vec<(String, String)> {
    let mut targets = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(request) = &entry.request else {
            continue;
        };
        let parsed = ParsedUrl::parse(&request.url);
        match request.method.to_uppercase().as_str() {
            "POST" => {
                if let (Some(rt), Some(id)) = (&parsed.resource_type, rewriter.reserved_post_id(index))
                {
                    targets.push((rt.clone(), id));
                }
            }
            "PUT" | "PATCH" | "DELETE" => {
                if let (Some(rt), Some(id)) = (&parsed.resource_type, &parsed.resource_id) {
                    targets.push((rt.clone(), id.clone()));
                }
            }
            _ => {}
        }
    }
    targets
}

fn with_entry_context(err: Error, index: usize) -> Error {
    match err {
        Error::InvalidResource(msg) => {
            Error::InvalidResource(format!("Transaction entry {}: {}", index, msg))
        }
        Error::Validation(msg) => Error::Validation(format!("Transaction entry {}: {}", index, msg)),
        Error::PreconditionFailed(msg) => {
            Error::PreconditionFailed(format!("Transaction entry {}: {}", index, msg))
        }
        other => other,
    }
}

fn delete_response(
    version_id: Option<i32>,
    prefer_return: PreferReturn,
    resource_type: &str,
    resource_id: &str,
) -> BundleEntry {
    BundleEntry {
        response: Some(BundleEntryResponse {
            status: status_line(204),
            location: None,
            etag: version_id.map(|v| format!("W/\"{}\"", v)),
            last_modified: None,
            outcome: match prefer_return {
                PreferReturn::OperationOutcome => Some(crate::models::outcome_info(format!(
                    "Resource deleted successfully: {}/{}",
                    resource_type, resource_id
                ))),
                _ => None,
            },
        }),
        ..Default::default()
    }
}

fn write_response(
    status: u16,
    written: &crate::models::Resource,
    prefer_return: PreferReturn,
    diagnostics: &str,
) -> BundleEntry {
    BundleEntry {
        response: Some(BundleEntryResponse {
            status: status_line(status),
            location: Some(format!(
                "{}/{}/_history/{}",
                written.resource_type, written.id, written.version_id
            )),
            etag: Some(written.etag()),
            last_modified: Some(written.last_updated.to_rfc3339()),
            outcome: match prefer_return {
                PreferReturn::OperationOutcome => {
                    Some(crate::models::outcome_info(diagnostics))
                }
                _ => None,
            },
        }),
        resource: match prefer_return {
            PreferReturn::Representation => Some(written.resource.clone()),
            _ => None,
        },
        ..Default::default()
    }
}

/// Accept a PATCH payload as either a `Binary` carrying
/// `application/json-patch+json` or a bare JSON Patch array.
pub(crate) fn parse_patch_payload(payload: &JsonValue) -> Result<json_patch::Patch> {
    if payload.is_array() {
        return serde_json::from_value(payload.clone())
            .map_err(|e| Error::InvalidResource(format!("Invalid JSON Patch document: {}", e)));
    }
    parse_json_patch_from_binary(payload)
}

fn parse_json_patch_from_binary(binary: &JsonValue) -> Result<json_patch::Patch> {
    let resource_type = binary
        .get("resourceType")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if resource_type != "Binary" {
        return Err(Error::InvalidResource(
            "Transaction PATCH requires a Binary resource payload".to_string(),
        ));
    }

    let content_type = binary
        .get("contentType")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if content_type != "application/json-patch+json" {
        return Err(Error::Unsupported(format!(
            "Unsupported PATCH Binary.contentType '{}'. Supported: application/json-patch+json",
            content_type
        )));
    }

    let data_b64 = binary
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidResource("Binary.data missing".to_string()))?;

    let bytes = STANDARD
        .decode(data_b64)
        .map_err(|e| Error::InvalidResource(format!("Invalid base64 in Binary.data: {}", e)))?;

    serde_json::from_slice::<json_patch::Patch>(&bytes)
        .map_err(|e| Error::InvalidResource(format!("Invalid JSON Patch document: {}", e)))
}

// =============================================================================
// URL replacement / fullUrl mapping
// =============================================================================

/// Rewrites `fullUrl` placeholders (usually `urn:uuid:…`) to their resolved
/// `Type/id` identities across every string field of a resource.
pub(crate) struct UrlRewriter {
    mapping: HashMap<String, String>,
    reserved_post_ids: HashMap<usize, String>,
}

impl UrlRewriter {
    pub fn new() -> Self {
        Self {
            mapping: HashMap::new(),
            reserved_post_ids: HashMap::new(),
        }
    }

    /// Map non-POST entry fullUrls to the identity in their request url.
    pub fn seed_non_post_mappings(&mut self, entries: &[BundleEntry]) {
        for entry in entries {
            let (Some(full_url), Some(request)) = (&entry.full_url, &entry.request) else {
                continue;
            };
            if request.method.to_uppercase() == "POST" {
                continue;
            }
            if let Some(identity) = ParsedUrl::parse(&request.url).identity() {
                self.mapping.insert(full_url.clone(), identity);
            }
        }
    }

    /// Assign server ids to POST entries up front so later entries can
    /// reference them.
    pub fn reserve_post_ids(&mut self, entries: &[BundleEntry], post_indices: &[usize]) -> Result<()> {
        for &idx in post_indices {
            let entry = &entries[idx];
            let request = entry.request.as_ref().ok_or_else(|| {
                Error::InvalidResource(format!("Transaction entry {} missing request", idx))
            })?;
            let resource_type = ParsedUrl::parse(&request.url)
                .resource_type
                .ok_or_else(|| {
                    Error::InvalidResource(format!(
                        "Transaction entry {} POST missing resource type in request.url",
                        idx
                    ))
                })?;

            let id = Uuid::new_v4().to_string();
            self.reserved_post_ids.insert(idx, id.clone());

            if let Some(full_url) = &entry.full_url {
                self.mapping
                    .insert(full_url.clone(), format!("{}/{}", resource_type, id));
            }
        }
        Ok(())
    }

    pub fn reserved_post_id(&self, index: usize) -> Option<String> {
        self.reserved_post_ids.get(&index).cloned()
    }

    /// Replace every mapped fullUrl occurrence in the resource.
    pub fn rewrite_resource(&self, resource: &mut JsonValue) {
        if self.mapping.is_empty() {
            return;
        }
        rewrite_json_value(resource, &self.mapping);
    }
}

fn rewrite_json_value(value: &mut JsonValue, mapping: &HashMap<String, String>) {
    match value {
        JsonValue::Object(map) => {
            for v in map.values_mut() {
                rewrite_json_value(v, mapping);
            }
        }
        JsonValue::Array(arr) => {
            for item in arr.iter_mut() {
                rewrite_json_value(item, mapping);
            }
        }
        JsonValue::String(s) => {
            if let Some(updated) = rewrite_string(s, mapping) {
                *s = updated;
            }
        }
        _ => {}
    }
}

fn rewrite_string(input: &str, mapping: &HashMap<String, String>) -> Option<String> {
    // Exact match first.
    if let Some(replacement) = mapping.get(input) {
        return Some(replacement.clone());
    }

    // Fragment-aware replacement: rewrite the base before '#'.
    if let Some((base, frag)) = input.split_once('#') {
        if let Some(replacement) = mapping.get(base) {
            return Some(format!("{}#{}", replacement, frag));
        }
    }

    // Generic substring replacement for narrative and other text fields.
    let mut out = input.to_string();
    let mut changed = false;
    for (from, to) in mapping {
        if out.contains(from.as_str()) {
            out = out.replace(from.as_str(), to);
            changed = true;
        }
    }

    changed.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BundleEntryRequest;

    fn entry(method: &str, url: &str, full_url: Option<&str>, resource: Option<JsonValue>) -> BundleEntry {
        BundleEntry {
            full_url: full_url.map(String::from),
            resource,
            request: Some(BundleEntryRequest {
                method: method.to_string(),
                url: url.to_string(),
                if_match: None,
                if_none_match: None,
                if_none_exist: None,
                if_modified_since: None,
            }),
            response: None,
            search: None,
            extensions: Default::default(),
        }
    }

    #[test]
    fn partition_preserves_order_within_groups() {
        let entries = vec![
            entry("GET", "Patient/a", None, None),
            entry("POST", "Patient", None, Some(json!({"resourceType": "Patient"}))),
            entry("DELETE", "Patient/b", None, None),
            entry("PUT", "Patient/c", None, Some(json!({"resourceType": "Patient"}))),
            entry("POST", "Observation", None, Some(json!({"resourceType": "Observation"}))),
        ];
        let (deletes, posts, puts, gets) = partition_transaction_entries(&entries).unwrap();
        assert_eq!(deletes, vec![2]);
        assert_eq!(posts, vec![1, 4]);
        assert_eq!(puts, vec![3]);
        assert_eq!(gets, vec![0]);
    }

    #[test]
    fn validation_rejects_missing_resource_and_duplicate_fullurl() {
        let entries = vec![entry("POST", "Patient", None, None)];
        assert!(validate_transaction_bundle(&entries).is_err());

        let entries = vec![
            entry("POST", "Patient", Some("urn:uuid:1"), Some(json!({"resourceType": "Patient"}))),
            entry("POST", "Patient", Some("urn:uuid:1"), Some(json!({"resourceType": "Patient"}))),
        ];
        assert!(validate_transaction_bundle(&entries).is_err());
    }

    #[test]
    fn identity_overlap_is_rejected() {
        let entries = vec![
            entry("PUT", "Patient/p1", None, Some(json!({"resourceType": "Patient"}))),
            entry("DELETE", "Patient/p1", None, None),
        ];
        let (deletes, posts, puts, _) = partition_transaction_entries(&entries).unwrap();
        assert!(check_identity_overlaps(&entries, &deletes, &posts, &puts).is_err());
    }

    #[test]
    fn rewriter_maps_urns_to_reserved_identities() {
        let entries = vec![
            entry(
                "POST",
                "Patient",
                Some("urn:uuid:pat"),
                Some(json!({"resourceType": "Patient"})),
            ),
            entry(
                "POST",
                "Observation",
                Some("urn:uuid:obs"),
                Some(json!({
                    "resourceType": "Observation",
                    "subject": {"reference": "urn:uuid:pat"}
                })),
            ),
        ];
        let mut rewriter = UrlRewriter::new();
        rewriter.seed_non_post_mappings(&entries);
        rewriter.reserve_post_ids(&entries, &[0, 1]).unwrap();

        let id = rewriter.reserved_post_id(0).unwrap();
        let mut observation = entries[1].resource.clone().unwrap();
        rewriter.rewrite_resource(&mut observation);
        assert_eq!(
            observation["subject"]["reference"],
            format!("Patient/{}", id)
        );
    }

    #[test]
    fn rewriter_seeds_put_identities() {
        let entries = vec![
            entry(
                "PUT",
                "Patient/known",
                Some("urn:uuid:pat"),
                Some(json!({"resourceType": "Patient", "id": "known"})),
            ),
            entry(
                "POST",
                "Observation",
                None,
                Some(json!({
                    "resourceType": "Observation",
                    "subject": {"reference": "urn:uuid:pat"}
                })),
            ),
        ];
        let mut rewriter = UrlRewriter::new();
        rewriter.seed_non_post_mappings(&entries);
        rewriter.reserve_post_ids(&entries, &[1]).unwrap();

        let mut observation = entries[1].resource.clone().unwrap();
        rewriter.rewrite_resource(&mut observation);
        assert_eq!(observation["subject"]["reference"], "Patient/known");
    }

    #[test]
    fn rewrite_string_handles_fragments_and_narrative() {
        let mut mapping = HashMap::new();
        mapping.insert("urn:uuid:x".to_string(), "Patient/p9".to_string());

        assert_eq!(
            rewrite_string("urn:uuid:x", &mapping).as_deref(),
            Some("Patient/p9")
        );
        assert_eq!(
            rewrite_string("urn:uuid:x#frag", &mapping).as_deref(),
            Some("Patient/p9#frag")
        );
        assert_eq!(
            rewrite_string("<div>see urn:uuid:x for details</div>", &mapping).as_deref(),
            Some("<div>see Patient/p9 for details</div>")
        );
        assert!(rewrite_string("nothing to do", &mapping).is_none());
    }

    #[test]
    fn binary_patch_decoding() {
        let patch = json!([{"op": "replace", "path": "/status", "value": "final"}]);
        let data = STANDARD.encode(serde_json::to_vec(&patch).unwrap());
        let binary = json!({
            "resourceType": "Binary",
            "contentType": "application/json-patch+json",
            "data": data,
        });
        assert!(parse_json_patch_from_binary(&binary).is_ok());

        let wrong_type = json!({"resourceType": "Binary", "contentType": "text/plain", "data": "eA=="});
        assert!(parse_json_patch_from_binary(&wrong_type).is_err());

        let not_binary = json!({"resourceType": "Patient"});
        assert!(parse_json_patch_from_binary(&not_binary).is_err());
    }
}
