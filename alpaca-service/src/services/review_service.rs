//! Review Workflow Service
//!
//! Record lifecycle and authorization-by-state guards:
//!
//! ```text
//! submit ──► PENDING ──approve──► APPROVED
//!               │
//!               └──reject───► REJECTED
//! ```
//!
//! Owners may edit or delete only while a record is PENDING. Approve and
//! reject are conditional writes on PENDING, so a review that races another
//! review or an owner delete cannot overwrite a terminal state.

use std::sync::Arc;

use alpaca_core::{
    AlpacaConfig, InstructionRecord, ListQuery, NewRecord, RecordId, RecordStatus, RecordUpdate,
    StatusCode,
};
use alpaca_storage::InstructionRepository;

use crate::constants::{DEFAULT_RECORD_PAGE_SIZE, MAX_RECORD_PAGE_SIZE};
use crate::context::{Caller, RequestContext};
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::types::{
    AdminUpdateRecordRequest, InstructionTriple, ListRecordsRequest, ListRecordsResponse,
    RecordResponse, SubmitRecordRequest, UpdateRecordRequest,
};
use crate::validation::{ValidateNonEmpty, ValidatePage};

/// Owner and administrator operations on instruction records.
#[derive(Clone)]
pub struct ReviewService {
    repo: InstructionRepository,
    config: Arc<AlpacaConfig>,
}

impl ReviewService {
    pub fn new(repo: InstructionRepository, config: Arc<AlpacaConfig>) -> Self {
        Self { repo, config }
    }

    fn default_theme(&self, theme: Option<&str>) -> String {
        match theme.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => self.config.default_theme.clone(),
        }
    }

    /// Translate a request update into a repository update, validating
    /// every present field.
    fn record_update(&self, fields: &UpdateRecordRequest) -> ServiceResult<RecordUpdate> {
        fields.instruction.validate_non_empty("instruction")?;
        fields.output.validate_non_empty("output")?;
        fields.source.validate_non_empty("source")?;
        let note = match (&fields.note, fields.clear_note) {
            (Some(_), true) => {
                return Err(ServiceError::validation_failed(
                    "note and clear_note are mutually exclusive",
                ))
            }
            (_, true) => Some(None),
            (note, false) => note.clone().map(Some),
        };
        Ok(RecordUpdate {
            instruction: fields.instruction.clone(),
            input: fields.input.clone(),
            output: fields.output.clone(),
            theme: fields
                .theme
                .as_deref()
                .map(|t| self.default_theme(Some(t))),
            source: fields.source.clone(),
            note,
            ..RecordUpdate::default()
        })
    }

    fn page(&self, request: &ListRecordsRequest) -> ServiceResult<ListQuery> {
        let limit = request.limit.unwrap_or(DEFAULT_RECORD_PAGE_SIZE);
        limit.validate_page_size("limit", MAX_RECORD_PAGE_SIZE)?;
        let mut query = request.to_query();
        query.limit = Some(limit);
        Ok(query)
    }

    /// Load a record and check that `caller` owns it and that it is still
    /// pending.
    async fn load_owned_pending(
        &self,
        ctx: &RequestContext,
        caller: &Caller,
        id: RecordId,
    ) -> ServiceResult<InstructionRecord> {
        let timeout = self.config.operation_timeout;
        let record = ctx
            .run("get_record", timeout, self.repo.get_by_id(id))
            .await?;
        if !record.is_owned_by(caller.user_id) {
            return Err(ServiceError::permission_deny(
                "Only the owner may modify this record",
            ));
        }
        if record.status.code != StatusCode::Pending {
            return Err(not_pending(&record));
        }
        Ok(record)
    }

    // ========================================================================
    // Owner operations
    // ========================================================================

    /// Create a PENDING record owned by the caller.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        request: SubmitRecordRequest,
    ) -> ServiceResult<RecordResponse> {
        let caller = ctx.require_caller()?;
        request.instruction.validate_non_empty("instruction")?;
        request.output.validate_non_empty("output")?;
        request.source.validate_non_empty("source")?;

        let new = NewRecord {
            owner_id: caller.user_id,
            username: caller.username.clone(),
            instruction: request.instruction,
            input: request.input,
            output: request.output,
            theme: self.default_theme(request.theme.as_deref()),
            source: request.source,
            note: request.note,
            status: RecordStatus::pending(),
        };
        let record = ctx
            .run("submit", self.config.operation_timeout, self.repo.insert(new))
            .await?;

        tracing::info!(
            record_id = %record.record_id,
            actor = %caller.user_id,
            status = %record.status.code,
            "Record submitted"
        );
        Ok(record.into())
    }

    /// A record the caller owns. Administrators may read any record.
    pub async fn get(&self, ctx: &RequestContext, id: RecordId) -> ServiceResult<RecordResponse> {
        let caller = ctx.require_caller()?;
        let record = ctx
            .run("get_record", self.config.operation_timeout, self.repo.get_by_id(id))
            .await?;
        if !record.is_owned_by(caller.user_id) && !caller.is_admin() {
            return Err(ServiceError::permission_deny(
                "Record belongs to another user",
            ));
        }
        Ok(record.into())
    }

    /// The caller's own records. Any owner filter in the request is ignored.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        request: ListRecordsRequest,
    ) -> ServiceResult<ListRecordsResponse> {
        let caller = ctx.require_caller()?;
        let mut query = self.page(&request)?;
        query.filter.owner_id = Some(caller.user_id);
        self.run_list(ctx, &query).await
    }

    /// Edit a pending record the caller owns.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: RecordId,
        request: UpdateRecordRequest,
    ) -> ServiceResult<RecordResponse> {
        let caller = ctx.require_caller()?;
        if request.is_empty() {
            return Err(ServiceError::validation_failed("Update has no fields"));
        }
        let update = self.record_update(&request)?.expecting(StatusCode::Pending);
        self.load_owned_pending(ctx, caller, id).await?;

        let record = ctx
            .run(
                "update_record",
                self.config.operation_timeout,
                self.repo.update(id, update),
            )
            .await
            .map_err(lost_to_review)?;
        tracing::debug!(record_id = %id, actor = %caller.user_id, "Record edited by owner");
        Ok(record.into())
    }

    /// Soft-delete a pending record the caller owns.
    pub async fn delete(&self, ctx: &RequestContext, id: RecordId) -> ServiceResult<()> {
        let caller = ctx.require_caller()?;
        self.load_owned_pending(ctx, caller, id).await?;

        ctx.run(
            "delete_record",
            self.config.operation_timeout,
            self.repo.soft_delete(id, Some(StatusCode::Pending)),
        )
        .await
        .map_err(lost_to_review)?;
        tracing::info!(record_id = %id, actor = %caller.user_id, "Record deleted by owner");
        Ok(())
    }

    // ========================================================================
    // Administrator operations
    // ========================================================================

    pub async fn admin_get(
        &self,
        ctx: &RequestContext,
        id: RecordId,
    ) -> ServiceResult<RecordResponse> {
        ctx.require_admin()?;
        let record = ctx
            .run("get_record", self.config.operation_timeout, self.repo.get_by_id(id))
            .await?;
        Ok(record.into())
    }

    /// Records of any owner; the request's owner filter is honoured.
    pub async fn admin_list(
        &self,
        ctx: &RequestContext,
        request: ListRecordsRequest,
    ) -> ServiceResult<ListRecordsResponse> {
        ctx.require_admin()?;
        let query = self.page(&request)?;
        self.run_list(ctx, &query).await
    }

    /// PENDING → APPROVED. Terminal records are a `StateConflict`.
    pub async fn approve(&self, ctx: &RequestContext, id: RecordId) -> ServiceResult<RecordResponse> {
        let admin = ctx.require_admin()?;
        self.review(ctx, admin, id, RecordStatus::approved()).await
    }

    /// PENDING → REJECTED with the reviewer's message stored verbatim.
    pub async fn reject(
        &self,
        ctx: &RequestContext,
        id: RecordId,
        message: &str,
    ) -> ServiceResult<RecordResponse> {
        let admin = ctx.require_admin()?;
        message.validate_non_empty("message")?;
        self.review(ctx, admin, id, RecordStatus::rejected(message))
            .await
    }

    async fn review(
        &self,
        ctx: &RequestContext,
        admin: &Caller,
        id: RecordId,
        status: RecordStatus,
    ) -> ServiceResult<RecordResponse> {
        let code = status.code;
        let update = RecordUpdate::status(status).expecting(StatusCode::Pending);
        let record = ctx
            .run(
                "review_record",
                self.config.operation_timeout,
                self.repo.update(id, update),
            )
            .await?;
        tracing::info!(
            record_id = %id,
            actor = %admin.user_id,
            status = %code,
            "Record reviewed"
        );
        Ok(record.into())
    }

    /// Correct a record in any state. Status is never touched.
    pub async fn admin_update(
        &self,
        ctx: &RequestContext,
        id: RecordId,
        request: AdminUpdateRecordRequest,
    ) -> ServiceResult<RecordResponse> {
        let admin = ctx.require_admin()?;
        if request.is_empty() {
            return Err(ServiceError::validation_failed("Update has no fields"));
        }
        let mut update = self.record_update(&request.fields)?;
        update.owner_id = request.owner_id;

        let record = ctx
            .run(
                "admin_update_record",
                self.config.operation_timeout,
                self.repo.update(id, update),
            )
            .await?;
        tracing::info!(
            record_id = %id,
            actor = %admin.user_id,
            owner_id = %record.owner_id,
            "Record corrected by administrator"
        );
        Ok(record.into())
    }

    /// Physically remove a record in any state.
    pub async fn admin_delete(&self, ctx: &RequestContext, id: RecordId) -> ServiceResult<()> {
        let admin = ctx.require_admin()?;
        ctx.run(
            "admin_delete_record",
            self.config.operation_timeout,
            self.repo.hard_delete(id),
        )
        .await?;
        tracing::info!(record_id = %id, actor = %admin.user_id, "Record removed");
        Ok(())
    }

    /// Physically remove every visible record matching the request's filter.
    pub async fn admin_purge(
        &self,
        ctx: &RequestContext,
        request: ListRecordsRequest,
    ) -> ServiceResult<u64> {
        let admin = ctx.require_admin()?;
        let filter = request.filter();
        let removed = ctx
            .run(
                "admin_purge_records",
                self.config.operation_timeout,
                self.repo.hard_delete_matching(&filter),
            )
            .await?;
        tracing::info!(actor = %admin.user_id, removed, "Records purged");
        Ok(removed)
    }

    // ========================================================================
    // Exports
    // ========================================================================

    /// Every matching record, unpaginated.
    ///
    /// Non-administrators only ever export their own records.
    pub async fn export_all(
        &self,
        ctx: &RequestContext,
        request: ListRecordsRequest,
    ) -> ServiceResult<Vec<RecordResponse>> {
        let records = self.export(ctx, &request).await?;
        Ok(records.into_iter().map(RecordResponse::from).collect())
    }

    /// Like [`export_all`](Self::export_all), projected to the
    /// instruction/input/output triple.
    pub async fn export_triples(
        &self,
        ctx: &RequestContext,
        request: ListRecordsRequest,
    ) -> ServiceResult<Vec<InstructionTriple>> {
        let records = self.export(ctx, &request).await?;
        Ok(records.into_iter().map(InstructionTriple::from).collect())
    }

    async fn export(
        &self,
        ctx: &RequestContext,
        request: &ListRecordsRequest,
    ) -> ServiceResult<Vec<InstructionRecord>> {
        let caller = ctx.require_caller()?;
        let mut query = request.to_query();
        query.offset = 0;
        query.limit = None;
        if !caller.is_admin() {
            query.filter.owner_id = Some(caller.user_id);
        }
        let (items, total) = ctx
            .run("export_records", self.config.operation_timeout, self.repo.list(&query))
            .await?;
        tracing::debug!(actor = %caller.user_id, total, "Records exported");
        Ok(items)
    }

    async fn run_list(
        &self,
        ctx: &RequestContext,
        query: &ListQuery,
    ) -> ServiceResult<ListRecordsResponse> {
        let (items, total) = ctx
            .run("list_records", self.config.operation_timeout, self.repo.list(query))
            .await?;
        Ok(ListRecordsResponse {
            items: items.into_iter().map(RecordResponse::from).collect(),
            total,
        })
    }
}

fn not_pending(record: &InstructionRecord) -> ServiceError {
    ServiceError::permission_deny(format!(
        "Record {} is {} and can no longer be modified",
        record.record_id, record.status.code
    ))
}

/// An owner write whose PENDING precondition failed lost a race to a review.
fn lost_to_review(err: ServiceError) -> ServiceError {
    if err.code == ErrorCode::StateConflict {
        ServiceError::permission_deny("Record was reviewed and can no longer be modified")
    } else {
        err
    }
}

// ============================================================================
// TESTS
// ============================================================================
