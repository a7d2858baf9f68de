use bounded_runner::{
    aggregate::{aggregate, Aggregation},
    logging,
    pair::Pair,
    BoundedTaskRunner, Config, ShutdownOutcome, TaskError, TaskHandle,
};
use tokio::{runtime::Builder, time::Duration};
use tracing::info;

fn main() -> anyhow::Result<()> {
    logging::init("info")?;
    let config = Config::from_env()?;

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        clean_run(config.clone()).await?;
        timed_out_run().await?;
        isolated_failure().await?;
        anyhow::Ok(())
    })?;

    let values: [i64; 8] = [3, 1, 4, 1, 5, 9, 2, 6];
    for op in [Aggregation::SumOfSquares, Aggregation::Average, Aggregation::Maximum] {
        match aggregate(Some(&values), op)? {
            Some(v) => println!("{op:?}: {v}"),
            None => println!("{op:?}: no value"),
        }
    }
    println!("empty average: {:?}", aggregate(Some(&[] as &[i64]), Aggregation::Average)?);

    let pair = Pair::new("answer", 42);
    println!("pair: {pair}");
    Ok(())
}

fn sleeper(runner: &BoundedTaskRunner, millis: u64) -> anyhow::Result<TaskHandle> {
    let handle = runner.submit(move |cancel| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(()),
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
        }
    })?;
    Ok(handle)
}

async fn clean_run(config: Config) -> anyhow::Result<()> {
    let runner = BoundedTaskRunner::with_config(config)?;
    let handles = (0..8)
        .map(|_| sleeper(&runner, 20))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let report = runner.shutdown_default().await;
    report_outcome("clean run", report.outcome);
    for handle in handles {
        let id = handle.id();
        let outcome = handle.await;
        info!(task_id = %id, ?outcome, "task outcome");
    }
    Ok(())
}

async fn timed_out_run() -> anyhow::Result<()> {
    let runner = BoundedTaskRunner::new(2)?;
    let handles = (0..5)
        .map(|_| sleeper(&runner, 200))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let report = runner.shutdown(Duration::from_millis(50)).await;
    report_outcome("timed-out run", report.outcome);
    println!(
        "  discarded {} queued, signalled {} running",
        report.cancelled_queued, report.abandoned_running
    );
    for handle in handles {
        let id = handle.id();
        let outcome = handle.await;
        info!(task_id = %id, ?outcome, "task outcome");
    }
    Ok(())
}

async fn isolated_failure() -> anyhow::Result<()> {
    let runner = BoundedTaskRunner::new(2)?;
    let ok_a = sleeper(&runner, 10)?;
    let bad = runner.submit(|_| async { Err(TaskError::msg("input rejected")) })?;
    let ok_b = sleeper(&runner, 10)?;

    let report = runner.shutdown(Duration::from_secs(1)).await;
    report_outcome("isolation run", report.outcome);
    println!("  outcomes: {:?} / {:?} / {:?}", ok_a.await, bad.await, ok_b.await);
    Ok(())
}

fn report_outcome(name: &str, outcome: ShutdownOutcome) {
    match outcome {
        ShutdownOutcome::Clean => println!("{name}: all tasks finished cleanly"),
        ShutdownOutcome::TimedOut => println!("{name}: grace period elapsed, stragglers cancelled"),
    }
}
