//! Restart recovery
//!
//! Tasks left `queued` or `running` by a previous process are resumed.
//! Stages that were dispatched but had not reported when the process
//! stopped are recorded as failed; everything not yet dispatched runs
//! normally once the task is requeued.

use fhg_common::events::TaskStatus;
use fhg_common::{Error, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{StageResult, Task};
use crate::store::TaskStore;

pub const INTERRUPTED_CODE: &str = "stage-interrupted";
const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

/// Record interrupted stages of `task` as failures; returns how many
pub fn mark_interrupted(task: &mut Task) -> Result<usize> {
    if task.status != TaskStatus::Running {
        return Ok(0);
    }
    let mut marked = 0;
    for &stage in task.state.stages() {
        if task.has_result(stage) {
            continue;
        }
        task.append_result(StageResult::failure(
            stage,
            INTERRUPTED_MESSAGE,
            INTERRUPTED_CODE,
            0,
            1,
        ))
        .map_err(|e| Error::Internal(e.to_string()))?;
        marked += 1;
    }
    Ok(marked)
}

/// Repair unfinished tasks and return their ids, oldest first
pub async fn recover(store: &dyn TaskStore) -> Result<Vec<Uuid>> {
    let unfinished = store.list_unfinished().await?;
    if unfinished.is_empty() {
        return Ok(Vec::new());
    }

    let mut task_ids = Vec::with_capacity(unfinished.len());
    for mut task in unfinished {
        let marked = mark_interrupted(&mut task)?;
        if marked > 0 {
            warn!(
                task_id = %task.task_id,
                state = task.state.as_str(),
                interrupted = marked,
                "Recorded stages interrupted by restart"
            );
            store.save(&task).await?;
        }
        task_ids.push(task.task_id);
    }

    info!(tasks = task_ids.len(), "Recovered unfinished tasks");
    Ok(task_ids)
}
