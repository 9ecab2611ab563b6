use conveyor_core::domain::build::StepStatus;
use conveyor_core::domain::step::{ContainerRun, RUN_STREAM};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::step::service::ServiceRunner;
use crate::step::{StepContext, StepOutcome, Writers, with_network};

/// Runs one container to completion on its own network
pub async fn execute(
    ctx: &StepContext<'_>,
    run: &ContainerRun,
    writers: &Writers,
) -> Result<StepOutcome> {
    let writer = writers.get(RUN_STREAM)?;
    let runner = ServiceRunner::for_run(ctx, run, writer);

    let exit = with_network(ctx.engine, &ctx.network_name(), async {
        let result = async {
            runner.pull_or_build().await?;
            runner.create().await?;
            runner.run(&CancellationToken::new()).await
        }
        .await;
        runner.remove().await;
        result
    })
    .await?;

    let status = if exit.code == 0 || run.ignore_exit_code {
        StepStatus::Success
    } else {
        StepStatus::Failed
    };

    Ok(StepOutcome::single(RUN_STREAM, status, Some(exit.code)))
}
