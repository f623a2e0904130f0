mod cli;
mod logging;
mod tasks;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use serde::Serialize;
use spindle_core::app::{AppBuilder, Client, Runtime, status::queue_stats};
use spindle_core::config::SpindleConfig;
use spindle_core::domain::{SubmitOptions, TaskHandle, TaskId, TaskRecord};
use spindle_core::impls::SqliteTaskStore;
use spindle_core::ports::TaskStore;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::tasks::{DataProcess, EmailDelivery, PROCESS_IN};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match cli.command {
        Commands::Run { config } => run(config.as_deref()).await,
        Commands::Demo { config } => demo(config.as_deref()).await,
        Commands::Status { db, task_id } => status(&db, &task_id).await,
        Commands::DeadLetters { db, limit } => dead_letters(&db, limit).await,
        Commands::Stats { db, config } => stats(&db, config.as_deref()).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<SpindleConfig> {
    match path {
        Some(path) => SpindleConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(SpindleConfig::default()),
    }
}

async fn open_existing(db: &Path) -> Result<SqliteTaskStore> {
    ensure!(db.exists(), "no database at {}", db.display());
    Ok(SqliteTaskStore::open(db).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let app = tasks::register(AppBuilder::new().with_config(config))?
        .build()
        .await?;
    let runtime = app.start().await?;
    serve_until(runtime, shutdown_signal()).await
}

/// Keep the runtime up until `stop` resolves, then drain it.
async fn serve_until(runtime: Runtime, stop: impl Future<Output = Result<()>>) -> Result<()> {
    let stopped = stop.await;
    info!("shutting down");
    runtime.shutdown_and_join().await;
    stopped
}

/// SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// 投入 → 実行 → 最終状態の表示までをプロセス内で行う
async fn demo(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let app = tasks::register(AppBuilder::new().with_config(config))?
        .build()
        .await?;
    let runtime = app.start().await?;
    let client = runtime.client();

    let health = client.health();
    info!(status = %health.status, time = %health.time, "health check");

    let mut handles = Vec::new();
    let emails = [
        ("user@example.com", "Test mail", "Checking the task dispatcher"),
        ("admin@example.com", "Notice", "Your account is active"),
    ];
    for (to, subject, body) in emails {
        let task = EmailDelivery {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        };
        handles.push(client.enqueue(&task, SubmitOptions::new()).await?);
    }

    for (data_id, action, delay) in [("DATA-001", "transform", 3), ("DATA-002", "analyze", 5)] {
        let task = DataProcess {
            data_id: data_id.into(),
            action: action.into(),
            delay,
        };
        handles.push(
            client
                .enqueue(&task, SubmitOptions::new().delay(PROCESS_IN))
                .await?,
        );
    }

    for i in 1..=5 {
        let task = EmailDelivery {
            to: format!("user{i}@example.com"),
            subject: format!("Batch mail #{i}"),
            body: format!("Batch mail number {i}"),
        };
        handles.push(client.enqueue(&task, SubmitOptions::new()).await?);
    }
    for handle in &handles {
        info!(task_id = %handle.id, queue = %handle.queue, state = %handle.state, "submitted");
    }

    let finished = wait_until_settled(&client, &handles).await;
    runtime.shutdown_and_join().await;
    let records = finished?;

    for record in &records {
        println!(
            "{}  {:<15} {:<10} retries={}",
            record.id, record.task_type, record.state, record.retry_count
        );
    }
    Ok(())
}

async fn wait_until_settled(client: &Client, handles: &[TaskHandle]) -> Result<Vec<TaskRecord>> {
    loop {
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            match client.status(handle.id).await? {
                Some(record) => records.push(record),
                None => bail!("task {} disappeared from the store", handle.id),
            }
        }
        if records.iter().all(|r| r.state.is_terminal()) {
            return Ok(records);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn status(db: &Path, task_id: &str) -> Result<()> {
    let id: TaskId = task_id.parse()?;
    let store = open_existing(db).await?;
    match store.get(id).await? {
        Some(record) => print_json(&record),
        None => bail!("task {id} not found"),
    }
}

async fn dead_letters(db: &Path, limit: usize) -> Result<()> {
    let store = open_existing(db).await?;
    print_json(&store.dead_letters(limit).await?)
}

async fn stats(db: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let store = open_existing(db).await?;
    let stats = queue_stats(&store, config.queues.iter().map(|q| q.name.as_str())).await?;
    print_json(&stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::domain::TaskState;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn serves_until_stopped_then_drains() {
        let app = tasks::register(AppBuilder::new()).unwrap().build().await.unwrap();
        let runtime = app.start().await.unwrap();
        let client = runtime.client();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(serve_until(runtime, async move {
            stop_rx.await?;
            Ok(())
        }));

        let handle = client
            .enqueue(
                &EmailDelivery {
                    to: "user@example.com".into(),
                    subject: "hello".into(),
                    body: "hi".into(),
                },
                SubmitOptions::new(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!serving.is_finished());

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();

        // The claimed email ran to completion before the runtime stopped.
        let record = client.status(handle.id).await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn stop_error_still_drains_runtime() {
        let app = tasks::register(AppBuilder::new()).unwrap().build().await.unwrap();
        let runtime = app.start().await.unwrap();

        let err = serve_until(runtime, async { bail!("signal handler unavailable") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("signal handler unavailable"));
    }
}
