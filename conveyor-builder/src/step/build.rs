use conveyor_core::domain::build::StepStatus;
use conveyor_core::domain::step::{BUILD_STREAM, ContainerBuild};

use crate::engine::ImageBuild;
use crate::error::Result;
use crate::step::{StepContext, StepOutcome, Writers};

/// Builds an image from the working tree; no container is run
pub async fn execute(
    ctx: &StepContext<'_>,
    build: &ContainerBuild,
    writers: &Writers,
) -> Result<StepOutcome> {
    let writer = writers.get(BUILD_STREAM)?;

    let image = ImageBuild {
        context: ctx.workspace.join(&build.context),
        dockerfile: build.dockerfile.clone(),
        tags: build.tags.clone(),
    };
    ctx.engine.build_image(&image, writer).await?;

    Ok(StepOutcome::single(BUILD_STREAM, StepStatus::Success, None))
}
