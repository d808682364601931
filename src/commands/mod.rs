//! Pipeline stage and administration commands
//!
//! Stage commands never return `Err` once their run log row exists: a store
//! failure mid-batch is written to the run log and reported with status
//! `failed`.

pub mod enrich;
pub mod init;
pub mod load;
pub mod maintenance;
pub mod pipeline;
pub mod promote;
pub mod secondary;
pub mod status;
pub mod transform;

pub use enrich::*;
pub use init::*;
pub use load::*;
pub use maintenance::*;
pub use pipeline::*;
pub use promote::*;
pub use secondary::*;
pub use status::*;
pub use transform::*;

use crate::error::Error;
use crate::meta::{MetaDb, PipelineRun, RunCounts, RunStatus};
use tracing::{error, warn};

/// Finalize a run that stopped on an error
async fn record_failed_run(db: &MetaDb, run: &PipelineRun, counts: &RunCounts, err: &Error) {
    error!(batch_id = %run.batch_id, stage = %run.stage, "Stage failed: {}", err);
    let message = err.to_string();
    if let Err(log_err) = db
        .complete_run(run, RunStatus::Failed, counts, Some(&message))
        .await
    {
        warn!(batch_id = %run.batch_id, "Could not record failed run: {}", log_err);
    }
}
