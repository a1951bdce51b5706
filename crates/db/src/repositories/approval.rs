use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
use signoff_core::domain::task::{ApprovalTask, Decision, TaskId, TaskStatus};
use signoff_core::domain::workflow::{
    FinalDecision, Workflow, WorkflowConfig, WorkflowFinalization, WorkflowId, WorkflowType,
};
use signoff_core::errors::StoreError;
use signoff_core::store::{TaskStore, WorkflowStore};

use super::RepositoryError;
use crate::DbPool;

const WORKFLOW_COLUMNS: &str = "id,
    proposal_id,
    workflow_type,
    config_json,
    required_approvers_json,
    optional_approvers_json,
    min_approvals,
    is_active,
    final_decision,
    created_at,
    completed_at";

const TASK_COLUMNS: &str = "t.id,
    t.workflow_id,
    t.proposal_id,
    t.approver_id,
    t.role,
    t.sequence,
    t.is_required,
    t.due_at,
    t.status,
    t.decision,
    t.comments,
    t.delegated_to,
    t.delegated_at,
    t.delegation_reason,
    t.completed_at,
    t.state_version,
    t.created_at,
    t.updated_at";

/// SQLite-backed [`WorkflowStore`] and [`TaskStore`].
///
/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison in SQL orders them correctly.
#[derive(Clone)]
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn select_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, title, status, approved_at, created_at, updated_at
             FROM proposal
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(proposal_from_row).transpose()
    }

    async fn upsert_proposal(&self, proposal: Proposal) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO proposal (id, title, status, approved_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                status = excluded.status,
                approved_at = excluded.approved_at,
                updated_at = excluded.updated_at",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.title)
        .bind(proposal.status.as_str())
        .bind(proposal.approved_at.map(format_timestamp))
        .bind(format_timestamp(proposal.created_at))
        .bind(format_timestamp(proposal.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn select_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        row.map(workflow_from_row).transpose()
    }

    async fn select_current_workflow(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS}
             FROM approval_workflow
             WHERE proposal_id = ?
             ORDER BY is_active DESC, created_at DESC, id DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql).bind(&proposal_id.0).fetch_optional(&self.pool).await?;

        row.map(workflow_from_row).transpose()
    }

    async fn insert_workflow_with_tasks(
        &self,
        workflow: Workflow,
        tasks: Vec<ApprovalTask>,
    ) -> Result<(Workflow, Vec<ApprovalTask>), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Loses silently to an existing active workflow via the partial unique index.
        sqlx::query(
            "INSERT INTO approval_workflow (
                id,
                proposal_id,
                workflow_type,
                config_json,
                required_approvers_json,
                optional_approvers_json,
                min_approvals,
                is_active,
                final_decision,
                created_at,
                completed_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, NULL, ?, NULL)
             ON CONFLICT DO NOTHING",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.proposal_id.0)
        .bind(workflow.workflow_type.as_str())
        .bind(to_json("config_json", &workflow.config)?)
        .bind(to_json("required_approvers_json", &workflow.required_approvers)?)
        .bind(to_json("optional_approvers_json", &workflow.optional_approvers)?)
        .bind(i64::from(workflow.min_approvals))
        .bind(format_timestamp(workflow.created_at))
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS}
             FROM approval_workflow
             WHERE proposal_id = ? AND is_active = 1"
        );
        let row = sqlx::query(&sql).bind(&workflow.proposal_id.0).fetch_one(&mut *tx).await?;
        let mut active = workflow_from_row(row)?;

        if active.id != workflow.id {
            let holders: Vec<String> =
                sqlx::query_scalar("SELECT approver_id FROM approval_task WHERE workflow_id = ?")
                    .bind(&active.id.0)
                    .fetch_all(&mut *tx)
                    .await?;
            active.absorb(&workflow.config, &holders).map_err(RepositoryError::Rejected)?;

            sqlx::query(
                "UPDATE approval_workflow
                 SET config_json = ?,
                     required_approvers_json = ?,
                     optional_approvers_json = ?,
                     min_approvals = ?
                 WHERE id = ?",
            )
            .bind(to_json("config_json", &active.config)?)
            .bind(to_json("required_approvers_json", &active.required_approvers)?)
            .bind(to_json("optional_approvers_json", &active.optional_approvers)?)
            .bind(i64::from(active.min_approvals))
            .bind(&active.id.0)
            .execute(&mut *tx)
            .await?;
        }

        let mut inserted = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            task.workflow_id = active.id.clone();
            sqlx::query(
                "INSERT INTO approval_task (
                    id,
                    workflow_id,
                    proposal_id,
                    approver_id,
                    role,
                    sequence,
                    is_required,
                    due_at,
                    status,
                    decision,
                    comments,
                    delegated_to,
                    delegated_at,
                    delegation_reason,
                    completed_at,
                    state_version,
                    created_at,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.id.0)
            .bind(&task.workflow_id.0)
            .bind(&task.proposal_id.0)
            .bind(&task.approver_id)
            .bind(task.role.as_deref())
            .bind(task.sequence)
            .bind(task.is_required)
            .bind(task.due_at.map(format_timestamp))
            .bind(task.status.as_str())
            .bind(task.decision.map(|decision| decision.as_str()))
            .bind(task.comments.as_deref())
            .bind(task.delegated_to.as_deref())
            .bind(task.delegated_at.map(format_timestamp))
            .bind(task.delegation_reason.as_deref())
            .bind(task.completed_at.map(format_timestamp))
            .bind(i64::from(task.state_version))
            .bind(format_timestamp(task.created_at))
            .bind(format_timestamp(task.updated_at))
            .execute(&mut *tx)
            .await?;
            inserted.push(task);
        }

        tx.commit().await?;
        Ok((active, inserted))
    }

    async fn close_workflow(
        &self,
        finalization: &WorkflowFinalization,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let completed_at = format_timestamp(finalization.completed_at);

        let closed = sqlx::query(
            "UPDATE approval_workflow
             SET is_active = 0, final_decision = ?, completed_at = ?
             WHERE id = ? AND is_active = 1",
        )
        .bind(finalization.decision.as_str())
        .bind(&completed_at)
        .bind(&finalization.workflow_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if closed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE proposal
             SET status = ?, approved_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(finalization.proposal_status().as_str())
        .bind(finalization.approved_at().map(format_timestamp))
        .bind(&completed_at)
        .bind(&finalization.proposal_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn select_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, RepositoryError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM approval_task t WHERE t.id = ?");
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        row.map(task_from_row).transpose()
    }

    async fn select_tasks_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ApprovalTask>, RepositoryError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS}
             FROM approval_task t
             WHERE t.workflow_id = ?
             ORDER BY t.sequence ASC, t.created_at ASC, t.approver_id ASC"
        );
        let rows = sqlx::query(&sql).bind(&workflow_id.0).fetch_all(&self.pool).await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn select_tasks_for_actor(
        &self,
        user_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<ApprovalTask>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS}
             FROM approval_task t
             JOIN approval_workflow w ON w.id = t.workflow_id
             WHERE w.is_active = 1
               AND (t.approver_id = ? OR t.delegated_to = ?)
               AND t.status IN ({placeholders})
             ORDER BY t.sequence ASC, t.created_at ASC"
        );

        let mut query = sqlx::query(&sql).bind(user_id).bind(user_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn select_overdue_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalTask>, RepositoryError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS}
             FROM approval_task t
             WHERE t.status IN ('pending', 'in_progress')
               AND t.due_at IS NOT NULL
               AND t.due_at < ?
             ORDER BY t.due_at ASC"
        );
        let rows = sqlx::query(&sql).bind(format_timestamp(now)).fetch_all(&self.pool).await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn update_task_if_version(
        &self,
        expected_version: u32,
        task: &ApprovalTask,
    ) -> Result<bool, RepositoryError> {
        let updated = sqlx::query(
            "UPDATE approval_task
             SET status = ?,
                 decision = ?,
                 comments = ?,
                 delegated_to = ?,
                 delegated_at = ?,
                 delegation_reason = ?,
                 completed_at = ?,
                 due_at = ?,
                 state_version = ?,
                 updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(task.status.as_str())
        .bind(task.decision.map(|decision| decision.as_str()))
        .bind(task.comments.as_deref())
        .bind(task.delegated_to.as_deref())
        .bind(task.delegated_at.map(format_timestamp))
        .bind(task.delegation_reason.as_deref())
        .bind(task.completed_at.map(format_timestamp))
        .bind(task.due_at.map(format_timestamp))
        .bind(i64::from(task.state_version))
        .bind(format_timestamp(task.updated_at))
        .bind(&task.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}

#[async_trait]
impl WorkflowStore for SqlApprovalStore {
    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        Ok(self.select_proposal(id).await?)
    }

    async fn save_proposal(&self, proposal: Proposal) -> Result<(), StoreError> {
        Ok(self.upsert_proposal(proposal).await?)
    }

    async fn find_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.select_workflow(id).await?)
    }

    async fn find_current_workflow(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Workflow>, StoreError> {
        Ok(self.select_current_workflow(proposal_id).await?)
    }

    async fn open_workflow(
        &self,
        workflow: Workflow,
        tasks: Vec<ApprovalTask>,
    ) -> Result<(Workflow, Vec<ApprovalTask>), StoreError> {
        Ok(self.insert_workflow_with_tasks(workflow, tasks).await?)
    }

    async fn finalize_workflow(
        &self,
        finalization: &WorkflowFinalization,
    ) -> Result<bool, StoreError> {
        Ok(self.close_workflow(finalization).await?)
    }
}

#[async_trait]
impl TaskStore for SqlApprovalStore {
    async fn find_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, StoreError> {
        Ok(self.select_task(id).await?)
    }

    async fn list_tasks_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        Ok(self.select_tasks_for_workflow(workflow_id).await?)
    }

    async fn list_tasks_for_actor(
        &self,
        user_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        Ok(self.select_tasks_for_actor(user_id, statuses).await?)
    }

    async fn list_overdue_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        Ok(self.select_overdue_tasks(now).await?)
    }

    async fn compare_and_swap_task(
        &self,
        expected_version: u32,
        task: &ApprovalTask,
    ) -> Result<bool, StoreError> {
        Ok(self.update_task_if_version(expected_version, task).await?)
    }
}

fn proposal_from_row(row: SqliteRow) -> Result<Proposal, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ProposalStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown proposal status `{status_raw}`"))
    })?;

    Ok(Proposal {
        id: ProposalId(row.try_get("id")?),
        title: row.try_get("title")?,
        status,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn workflow_from_row(row: SqliteRow) -> Result<Workflow, RepositoryError> {
    let type_raw = row.try_get::<String, _>("workflow_type")?;
    let workflow_type = WorkflowType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown workflow type `{type_raw}`")))?;
    let final_decision = row
        .try_get::<Option<String>, _>("final_decision")?
        .map(|value| {
            FinalDecision::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown final decision `{value}`")))
        })
        .transpose()?;

    Ok(Workflow {
        id: WorkflowId(row.try_get("id")?),
        proposal_id: ProposalId(row.try_get("proposal_id")?),
        workflow_type,
        config: from_json::<WorkflowConfig>("config_json", row.try_get("config_json")?)?,
        required_approvers: from_json(
            "required_approvers_json",
            row.try_get("required_approvers_json")?,
        )?,
        optional_approvers: from_json(
            "optional_approvers_json",
            row.try_get("optional_approvers_json")?,
        )?,
        min_approvals: parse_u32("min_approvals", row.try_get("min_approvals")?)?,
        is_active: row.try_get("is_active")?,
        final_decision,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
    })
}

fn task_from_row(row: SqliteRow) -> Result<ApprovalTask, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status_raw}`")))?;
    let decision = row
        .try_get::<Option<String>, _>("decision")?
        .map(|value| {
            Decision::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{value}`")))
        })
        .transpose()?;

    Ok(ApprovalTask {
        id: TaskId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        proposal_id: ProposalId(row.try_get("proposal_id")?),
        approver_id: row.try_get("approver_id")?,
        role: row.try_get("role")?,
        sequence: row.try_get("sequence")?,
        is_required: row.try_get("is_required")?,
        due_at: parse_optional_timestamp("due_at", row.try_get("due_at")?)?,
        status,
        decision,
        comments: row.try_get("comments")?,
        delegated_to: row.try_get("delegated_to")?,
        delegated_at: parse_optional_timestamp("delegated_at", row.try_get("delegated_at")?)?,
        delegation_reason: row.try_get("delegation_reason")?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

fn from_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: String,
) -> Result<T, RepositoryError> {
    serde_json::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}
