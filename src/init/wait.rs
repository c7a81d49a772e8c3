// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

pub async fn wait_for_any_task(tasks: &mut JoinSet<Result<(), BoxError>>) -> Result<(), BoxError> {
    let r = tasks.join_next().await;

    match r {
        None => Ok(()), // should not happen
        Some(res) => res?,
    }
}

/// Joins every task, returning the last task error seen.
pub async fn wait_for_all_tasks(tasks: &mut JoinSet<Result<(), BoxError>>) -> Result<(), BoxError> {
    let mut result = Ok(());
    while let Some(v) = tasks.join_next().await {
        if let Err(e) = join_result(v) {
            result = Err(e);
        }
    }
    result
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<Result<(), BoxError>>,
    timeout: Duration,
) -> Result<(), BoxError> {
    wait_for_tasks_with_deadline(tasks, Instant::now() + timeout).await
}

pub async fn wait_for_tasks_with_deadline(
    tasks: &mut JoinSet<Result<(), BoxError>>,
    stop_at: Instant,
) -> Result<(), BoxError> {
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err("timed out waiting for tasks to complete".into());
                break;
            }
            Ok(None) => break,
            Ok(Some(v)) => {
                if let Err(e) = join_result(v) {
                    result = Err(e);
                }
            }
        }
    }

    result
}

fn join_result(
    v: Result<Result<(), BoxError>, tokio::task::JoinError>,
) -> Result<(), BoxError> {
    match v {
        Ok(res) => res,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => {
            error!("Failed to join with task: {:?}", e);
            Err(e.into())
        }
    }
}
