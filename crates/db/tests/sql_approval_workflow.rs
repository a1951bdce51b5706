use std::sync::Arc;

use chrono::{Duration, Utc};
use signoff_core::approvals::{ApprovalManager, DecisionInput, WorkflowPolicy};
use signoff_core::domain::proposal::{Proposal, ProposalId, ProposalStatus};
use signoff_core::domain::task::{ApprovalTask, Decision, TaskStatus};
use signoff_core::domain::workflow::{ApproverSpec, FinalDecision, WorkflowConfig, WorkflowType};
use signoff_core::notify::InMemoryNotificationSink;
use signoff_core::store::WorkflowStore;
use signoff_db::{connect_with_settings, migrations, SqlApprovalStore};
use tempfile::TempDir;

type WorkflowTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

const PROPOSAL: &str = "P-2026-0107";

struct Fixture {
    _dir: TempDir,
    store: Arc<SqlApprovalStore>,
    manager: ApprovalManager,
}

async fn fixture(policy: WorkflowPolicy) -> WorkflowTestResult<Fixture> {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let url = format!("sqlite://{}", dir.path().join("signoff.db").display());
    let pool = connect_with_settings(&url, 4, 30).await.map_err(|err| err.to_string())?;
    migrations::run_pending(&pool).await.map_err(|err| err.to_string())?;

    let store = Arc::new(SqlApprovalStore::new(pool));
    store
        .save_proposal(Proposal::new(PROPOSAL, "Data centre lease", ProposalStatus::PendingApproval))
        .await
        .map_err(|err| err.to_string())?;

    let manager = ApprovalManager::with_store(
        store.clone(),
        Arc::new(InMemoryNotificationSink::default()),
        policy,
    );
    Ok(Fixture { _dir: dir, store, manager })
}

fn proposal_id() -> ProposalId {
    ProposalId(PROPOSAL.to_string())
}

fn required(user_id: &str) -> ApproverSpec {
    ApproverSpec {
        user_id: user_id.to_string(),
        role: None,
        sequence: 1,
        is_required: true,
        due_hours: None,
    }
}

fn three_required(timeout_hours: Option<u32>) -> WorkflowConfig {
    WorkflowConfig {
        workflow_type: WorkflowType::Parallel,
        approvers: vec![required("1"), required("2"), required("3")],
        min_approvals: 2,
        timeout_hours,
    }
}

fn task_for<'a>(tasks: &'a [ApprovalTask], user_id: &str) -> WorkflowTestResult<&'a ApprovalTask> {
    tasks
        .iter()
        .find(|task| task.approver_id == user_id)
        .ok_or_else(|| format!("no task for approver {user_id}"))
}

#[tokio::test]
async fn rejection_finalizes_against_sqlite() -> WorkflowTestResult {
    let fx = fixture(WorkflowPolicy::default()).await?;
    let tasks = fx
        .manager
        .create_workflow(&proposal_id(), three_required(None))
        .await
        .map_err(|err| err.to_string())?;

    fx.manager
        .submit_decision(&task_for(&tasks, "1")?.id, "1", DecisionInput::new(Decision::Approved))
        .await
        .map_err(|err| err.to_string())?;
    let progress = fx.manager.progress(&proposal_id()).await.map_err(|err| err.to_string())?;
    require_eq!(progress.completed, 1);
    require!(!progress.is_complete, "one approval must not complete the workflow");

    fx.manager
        .submit_decision(&task_for(&tasks, "2")?.id, "2", DecisionInput::new(Decision::Rejected))
        .await
        .map_err(|err| err.to_string())?;
    let progress = fx.manager.progress(&proposal_id()).await.map_err(|err| err.to_string())?;
    require_eq!(progress.completed, 2);
    require!(progress.is_complete);
    require_eq!(progress.final_decision, FinalDecision::Rejected);

    let proposal = fx
        .store
        .find_proposal(&proposal_id())
        .await
        .map_err(|err| err.to_string())?
        .ok_or("proposal missing")?;
    require_eq!(proposal.status, ProposalStatus::Rejected);
    require!(proposal.approved_at.is_none(), "rejected proposals carry no approval stamp");
    Ok(())
}

#[tokio::test]
async fn concurrent_quorum_decisions_finalize_once_against_sqlite() -> WorkflowTestResult {
    let fx = fixture(WorkflowPolicy::default()).await?;
    let tasks = fx
        .manager
        .create_workflow(&proposal_id(), three_required(None))
        .await
        .map_err(|err| err.to_string())?;
    fx.manager
        .submit_decision(&task_for(&tasks, "1")?.id, "1", DecisionInput::new(Decision::Approved))
        .await
        .map_err(|err| err.to_string())?;

    let second = task_for(&tasks, "2")?.id.clone();
    let third = task_for(&tasks, "3")?.id.clone();
    let (left, right) = tokio::join!(
        fx.manager.submit_decision(&second, "2", DecisionInput::new(Decision::Approved)),
        fx.manager.submit_decision(&third, "3", DecisionInput::new(Decision::Approved)),
    );
    left.map_err(|err| err.to_string())?;
    right.map_err(|err| err.to_string())?;

    let snapshot = fx
        .manager
        .workflow_for_proposal(&proposal_id())
        .await
        .map_err(|err| err.to_string())?
        .ok_or("workflow missing")?;
    require!(!snapshot.workflow.is_active);
    require_eq!(snapshot.workflow.final_decision, Some(FinalDecision::Approved));
    let stamped = snapshot.workflow.completed_at;

    let recheck = fx
        .manager
        .reevaluate_workflow(&snapshot.workflow.id)
        .await
        .map_err(|err| err.to_string())?;
    require_eq!(recheck, None::<FinalDecision>);

    let after = fx
        .store
        .find_workflow(&snapshot.workflow.id)
        .await
        .map_err(|err| err.to_string())?
        .ok_or("workflow missing")?;
    require_eq!(after.completed_at, stamped);
    Ok(())
}

#[tokio::test]
async fn sweep_is_idempotent_against_sqlite() -> WorkflowTestResult {
    let fx = fixture(WorkflowPolicy::default()).await?;
    let tasks = fx
        .manager
        .create_workflow(&proposal_id(), three_required(Some(2)))
        .await
        .map_err(|err| err.to_string())?;
    fx.manager
        .submit_decision(&task_for(&tasks, "3")?.id, "3", DecisionInput::new(Decision::Approved))
        .await
        .map_err(|err| err.to_string())?;

    let later = Utc::now() + Duration::hours(3);
    let first = fx.manager.sweep_expired_at(later).await.map_err(|err| err.to_string())?;
    require_eq!(first.expired, 2);
    let second = fx.manager.sweep_expired_at(later).await.map_err(|err| err.to_string())?;
    require_eq!(second.expired, 0);

    let expired = fx.manager.pending_for_user("1", true).await.map_err(|err| err.to_string())?;
    require_eq!(expired.len(), 1);
    require_eq!(expired[0].status, TaskStatus::Expired);
    let open = fx.manager.pending_for_user("1", false).await.map_err(|err| err.to_string())?;
    require!(open.is_empty(), "expired tasks only show up when requested");
    Ok(())
}
