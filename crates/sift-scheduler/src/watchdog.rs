use std::future::Future;
use std::time::Duration;

use crate::{CancellationToken, TaskError};

/// Awaits `fut` for at most `deadline`.
///
/// Returns [`TaskError::DeadlineExceeded`] if the deadline elapses first and
/// [`TaskError::Cancelled`] if `cancel` fires first. In both cases `fut` is
/// dropped, so whatever it was waiting on is abandoned rather than left
/// pending.
pub async fn run_with_deadline<F>(
    deadline: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, TaskError>
where
    F: Future,
{
    if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskError::Cancelled),
        result = tokio::time::timeout(deadline, fut) => {
            result.map_err(|_| TaskError::DeadlineExceeded(deadline))
        }
    }
}
