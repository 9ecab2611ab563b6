//! Stack steps
//!
//! Services are pulled and created in dependency order, then run
//! concurrently until the first one exits; the rest are stopped. The step
//! succeeds when every service that exited on its own exited with 0.

use std::collections::BTreeMap;

use conveyor_core::domain::build::StepStatus;
use conveyor_core::domain::step::ContainerStack;
use conveyor_core::order::service_order;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::step::service::{ServiceExit, ServiceRunner};
use crate::step::{StepContext, StepOutcome, Writers, with_network};

pub async fn execute(
    ctx: &StepContext<'_>,
    stack: &ContainerStack,
    writers: &Writers,
) -> Result<StepOutcome> {
    let order = service_order(&stack.links())?;

    let mut runners = Vec::with_capacity(order.len());
    for name in &order {
        let service = &stack.services[name];
        runners.push(ServiceRunner::for_service(ctx, name, service, writers.get(name)?));
    }

    let exits = with_network(ctx.engine, &ctx.network_name(), async {
        let result = run_services(&runners).await;
        for runner in &runners {
            runner.remove().await;
        }
        result
    })
    .await?;

    let success = exits.values().all(|exit| exit.stopped || exit.code == 0);
    let status = if success {
        StepStatus::Success
    } else {
        StepStatus::Failed
    };

    let exit_codes = exits
        .into_iter()
        .map(|(name, exit)| (name, (!exit.stopped).then_some(exit.code)))
        .collect();

    Ok(StepOutcome { status, exit_codes })
}

async fn run_services(runners: &[ServiceRunner<'_>]) -> Result<BTreeMap<String, ServiceExit>> {
    for runner in runners {
        runner.pull_or_build().await?;
    }
    for runner in runners {
        runner.create().await?;
    }

    let stop = CancellationToken::new();
    let results = join_all(runners.iter().map(|runner| runner.run(&stop))).await;

    let mut exits = BTreeMap::new();
    for (runner, result) in runners.iter().zip(results) {
        exits.insert(runner.name().to_string(), result?);
    }
    Ok(exits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{FakeEngine, FakeExit};
    use crate::step::testing::{context, drain, task, writers};
    use crate::step;
    use conveyor_core::domain::parameter::ResolvedParameters;
    use conveyor_core::domain::step::Step;
    use std::path::Path;

    const STACK: &str = r#"
type: stack
description: integration
services:
  db:
    image: postgres:16
  web:
    image: app:latest
    links: [db]
    command: ./run-tests.sh
"#;

    #[tokio::test]
    async fn test_services_created_in_dependency_order() {
        let engine = FakeEngine::new()
            .exit("db", FakeExit::UntilStopped)
            .exit("web", FakeExit::Code(0));
        let task = task();
        let params = ResolvedParameters::default();
        let ctx = context(&engine, &task, &params, Path::new("/work"));
        let (writers, _rx) = writers(&["db", "web"]);
        let step: Step = serde_yaml::from_str(STACK).unwrap();

        let outcome = step::execute(&ctx, &step, &writers).await;

        assert_eq!(outcome.status, StepStatus::Success);
        assert_eq!(outcome.exit_codes["web"], Some(0));
        assert_eq!(outcome.exit_codes["db"], None);

        let calls = engine.calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        assert!(position("create db") < position("create web"));
        assert!(position("stop db") > position("start web"));
        assert_eq!(calls.last().unwrap(), "remove network conveyor-b1-0");
    }

    #[tokio::test]
    async fn test_failing_service_fails_every_stream() {
        let engine = FakeEngine::new()
            .exit("db", FakeExit::UntilStopped)
            .exit("web", FakeExit::Code(2));
        let task = task();
        let params = ResolvedParameters::default();
        let ctx = context(&engine, &task, &params, Path::new("/work"));
        let (writers, mut rx) = writers(&["db", "web"]);
        let step: Step = serde_yaml::from_str(STACK).unwrap();

        let outcome = step::execute(&ctx, &step, &writers).await;
        assert_eq!(outcome.status, StepStatus::Failed);

        let lines = drain(&mut rx);
        let terminal: Vec<_> = lines
            .iter()
            .filter(|l| l.status == StepStatus::Failed)
            .collect();
        assert_eq!(terminal.len(), 2);
        assert!(terminal.iter().any(|l| l.output.contains("exited: 2")));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_container() {
        let engine = FakeEngine::new();
        let task = task();
        let params = ResolvedParameters::default();
        let ctx = context(&engine, &task, &params, Path::new("/work"));
        let (writers, _rx) = writers(&["cache", "web"]);
        let step: Step = serde_yaml::from_str(
            "type: stack\nservices:\n  web:\n    image: app\n    links: [cache]\n  cache:\n    image: redis\n    links: [web]\n",
        )
        .unwrap();

        let outcome = step::execute(&ctx, &step, &writers).await;
        assert_eq!(outcome.status, StepStatus::Failed);
        assert!(engine.calls().is_empty());
    }
}
