//! CRUD service: business logic for single-resource interactions.

use chrono::Utc;
use json_patch::PatchErrorKind;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::PgResourceStore,
    models::{
        is_known_resource_type, ConditionalDeleteMode, CreateParams, HistoryResult, Resource,
        ResourceOperation, ResourceResult, UpdateParams,
    },
    notify::{ChangeEvent, ChangeKind, ChangeNotifier},
    search::SearchEngine,
    Error, Result,
};

use super::conditional::{ConditionalMatch, ConditionalService};
use super::{next_version_for, populate_meta};

pub struct CrudService {
    store: PgResourceStore,
    conditional: ConditionalService,
    notifier: ChangeNotifier,
    allow_update_create: bool,
}

impl CrudService {
    pub fn new(
        store: PgResourceStore,
        search: Arc<SearchEngine>,
        notifier: ChangeNotifier,
        allow_update_create: bool,
    ) -> Self {
        Self {
            store,
            conditional: ConditionalService::new(search),
            notifier,
            allow_update_create,
        }
    }

    /// Create a resource (POST). Honours `If-None-Exist` conditional-create:
    /// one existing match is a no-op returning the match, several are a
    /// conflict.
    pub async fn create(
        &self,
        resource_type: &str,
        mut resource: JsonValue,
        params: Option<CreateParams>,
    ) -> Result<ResourceResult> {
        self.validate_type_name(resource_type)?;
        self.validate_resource_type(&resource, resource_type)?;

        if let Some(criteria) = params.and_then(|p| p.if_none_exist) {
            let mut conn = self.store.pool().acquire().await?;
            match self
                .conditional
                .evaluate_query(&mut conn, resource_type, &criteria)
                .await?
            {
                ConditionalMatch::None => {}
                ConditionalMatch::One(existing) => {
                    return Ok(ResourceResult {
                        resource: existing,
                        operation: ResourceOperation::NoOp,
                    });
                }
                ConditionalMatch::Many(matches) => {
                    return Err(Error::MultipleMatches {
                        interaction: "create".to_string(),
                        count: matches.len(),
                    });
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        populate_meta(&mut resource, &id, 1, Utc::now());

        let created = self.store.create(resource_type, resource).await?;
        self.notify(&created, ChangeKind::Create);

        Ok(ResourceResult {
            resource: created,
            operation: ResourceOperation::Created,
        })
    }

    /// Read the current version (GET). Deleted resources are gone, unknown
    /// ids are not found.
    pub async fn read(&self, resource_type: &str, id: &str) -> Result<Resource> {
        self.validate_type_name(resource_type)?;
        match self.store.read(resource_type, id).await? {
            Some(resource) if resource.deleted => Err(Error::ResourceDeleted {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version_id: Some(resource.version_id),
            }),
            Some(resource) => Ok(resource),
            None => Err(Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }),
        }
    }

    /// Update a resource (PUT), creating it when the id is unknown and the
    /// server allows client-supplied ids.
    pub async fn update(
        &self,
        resource_type: &str,
        id: &str,
        mut resource: JsonValue,
        params: Option<UpdateParams>,
    ) -> Result<ResourceResult> {
        self.validate_type_name(resource_type)?;
        self.validate_resource_type(&resource, resource_type)?;

        if let Some(body_id) = resource.get("id") {
            match body_id.as_str() {
                Some(body_id) if body_id == id => {}
                Some(body_id) => {
                    return Err(Error::InvalidResource(format!(
                        "Resource id '{}' does not match URL id '{}'",
                        body_id, id
                    )))
                }
                None => {
                    return Err(Error::InvalidResource(
                        "Resource id must be a string".to_string(),
                    ))
                }
            }
        }

        let current = self.store.read(resource_type, id).await?;

        if let Some(expected) = params.and_then(|p| p.if_match) {
            let current = current.as_ref().ok_or_else(|| Error::ResourceNotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            })?;
            if current.version_id != expected {
                return Err(Error::VersionConflict {
                    expected,
                    actual: current.version_id,
                });
            }
        }

        let operation = match &current {
            Some(_) => ResourceOperation::Updated,
            None => {
                if !self.allow_update_create {
                    return Err(Error::MethodNotAllowed(
                        "Server does not allow client-defined resource ids. \
                         Use POST to create resources with server-assigned ids."
                            .to_string(),
                    ));
                }
                ResourceOperation::Created
            }
        };

        populate_meta(&mut resource, id, next_version_for(current.as_ref()), Utc::now());
        let written = self.store.upsert(resource_type, id, resource).await?;
        self.notify(
            &written,
            match operation {
                ResourceOperation::Created => ChangeKind::Create,
                _ => ChangeKind::Update,
            },
        );

        Ok(ResourceResult {
            resource: written,
            operation,
        })
    }

    /// Conditional update (PUT {type}?criteria). Zero matches create, one
    /// match updates it, several are a conflict.
    pub async fn conditional_update(
        &self,
        resource_type: &str,
        criteria: &[(String, String)],
        resource: JsonValue,
        params: Option<UpdateParams>,
    ) -> Result<ResourceResult> {
        self.validate_type_name(resource_type)?;

        let matched = {
            let mut conn = self.store.pool().acquire().await?;
            self.conditional
                .evaluate(&mut conn, resource_type, criteria)
                .await?
        };

        match matched {
            ConditionalMatch::None => {
                // Create, honouring a client-supplied id when present.
                match resource.get("id").and_then(|v| v.as_str()) {
                    Some(id) => {
                        let id = id.to_string();
                        self.update(resource_type, &id, resource, params).await
                    }
                    None => self.create(resource_type, resource, None).await,
                }
            }
            ConditionalMatch::One(existing) => {
                if let Some(body_id) = resource.get("id").and_then(|v| v.as_str()) {
                    if body_id != existing.id {
                        return Err(Error::InvalidResource(format!(
                            "Resource id '{}' does not match the conditional match '{}'",
                            body_id, existing.id
                        )));
                    }
                }
                let id = existing.id.clone();
                self.update(resource_type, &id, resource, params).await
            }
            ConditionalMatch::Many(matches) => Err(Error::MultipleMatches {
                interaction: "update".to_string(),
                count: matches.len(),
            }),
        }
    }

    /// Apply a JSON Patch (PATCH). The patched document is processed as a
    /// normal update; identity fields cannot be changed.
    pub async fn patch(
        &self,
        resource_type: &str,
        id: &str,
        patch: json_patch::Patch,
        params: Option<UpdateParams>,
    ) -> Result<ResourceResult> {
        self.validate_type_name(resource_type)?;
        let current = self.read(resource_type, id).await?;

        if let Some(expected) = params.and_then(|p| p.if_match) {
            if current.version_id != expected {
                return Err(Error::VersionConflict {
                    expected,
                    actual: current.version_id,
                });
            }
        }

        let mut patched = current.resource.clone();
        json_patch::patch(&mut patched, &patch.0).map_err(|e| match e.kind {
            PatchErrorKind::TestFailed => Error::UnprocessableEntity(e.to_string()),
            _ => Error::InvalidResource(e.to_string()),
        })?;

        let obj = patched.as_object_mut().ok_or_else(|| {
            Error::InvalidResource("Patched resource must be a JSON object".to_string())
        })?;
        obj.insert("resourceType".to_string(), serde_json::json!(resource_type));
        obj.insert("id".to_string(), serde_json::json!(id));
        // The patch changes data without touching narrative; drop the
        // narrative rather than serve one that may no longer match.
        obj.remove("text");

        populate_meta(&mut patched, id, current.version_id + 1, Utc::now());
        let written = self.store.upsert(resource_type, id, patched).await?;
        self.notify(&written, ChangeKind::Update);

        Ok(ResourceResult {
            resource: written,
            operation: ResourceOperation::Updated,
        })
    }

    /// Delete a resource (DELETE). Idempotent: deleting a missing or
    /// already-deleted resource succeeds; the tombstone version is returned
    /// when one exists.
    pub async fn delete(&self, resource_type: &str, id: &str) -> Result<Option<i32>> {
        self.validate_type_name(resource_type)?;

        let Some(current) = self.store.read(resource_type, id).await? else {
            return Ok(None);
        };
        if current.deleted {
            return Ok(Some(current.version_id));
        }

        let version_id = self.store.delete(resource_type, id).await?;
        self.notifier.publish(ChangeEvent {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version_id,
            kind: ChangeKind::Delete,
        });
        Ok(Some(version_id))
    }

    /// Conditional delete (DELETE {type}?criteria). Several matches error
    /// unless the caller opted into multi-delete.
    pub async fn conditional_delete(
        &self,
        resource_type: &str,
        criteria: &[(String, String)],
        mode: ConditionalDeleteMode,
    ) -> Result<Vec<(String, i32)>> {
        self.validate_type_name(resource_type)?;

        let matched = {
            let mut conn = self.store.pool().acquire().await?;
            self.conditional
                .evaluate(&mut conn, resource_type, criteria)
                .await?
        };

        let targets = match matched {
            ConditionalMatch::None => return Ok(Vec::new()),
            ConditionalMatch::One(resource) => vec![resource],
            ConditionalMatch::Many(matches) => {
                if mode == ConditionalDeleteMode::Single {
                    return Err(Error::MultipleMatches {
                        interaction: "delete".to_string(),
                        count: matches.len(),
                    });
                }
                matches
            }
        };

        let mut deleted = Vec::new();
        for target in targets {
            if let Some(version_id) = self.delete(resource_type, &target.id).await? {
                deleted.push((target.id, version_id));
            }
        }
        Ok(deleted)
    }

    /// Read a specific version (vread). A tombstone version is gone.
    pub async fn vread(&self, resource_type: &str, id: &str, version_id: i32) -> Result<Resource> {
        self.validate_type_name(resource_type)?;
        let resource = self.store.vread(resource_type, id, version_id).await?;
        if resource.deleted {
            return Err(Error::ResourceDeleted {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version_id: Some(resource.version_id),
            });
        }
        Ok(resource)
    }

    pub async fn history(
        &self,
        resource_type: &str,
        id: &str,
        count: Option<i64>,
        since: Option<chrono::DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        self.validate_type_name(resource_type)?;
        self.store
            .history(resource_type, id, count, since, sort_ascending)
            .await
    }

    pub async fn type_history(
        &self,
        resource_type: &str,
        count: Option<i64>,
        since: Option<chrono::DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        self.validate_type_name(resource_type)?;
        self.store
            .type_history(resource_type, count, since, sort_ascending)
            .await
    }

    pub async fn system_history(
        &self,
        count: Option<i64>,
        since: Option<chrono::DateTime<Utc>>,
        sort_ascending: bool,
    ) -> Result<HistoryResult> {
        self.store.system_history(count, since, sort_ascending).await
    }

    fn notify(&self, resource: &Resource, kind: ChangeKind) {
        self.notifier.publish(ChangeEvent {
            resource_type: resource.resource_type.clone(),
            id: resource.id.clone(),
            version_id: resource.version_id,
            kind,
        });
    }

    fn validate_type_name(&self, resource_type: &str) -> Result<()> {
        if !is_known_resource_type(resource_type) {
            return Err(Error::Validation(format!(
                "Invalid resource type: {}",
                resource_type
            )));
        }
        Ok(())
    }

    fn validate_resource_type(&self, resource: &JsonValue, expected: &str) -> Result<()> {
        let actual = resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidResource("Missing resourceType field".to_string()))?;
        if actual != expected {
            return Err(Error::InvalidResource(format!(
                "Resource type mismatch: expected {}, got {}",
                expected, actual
            )));
        }
        Ok(())
    }
}
