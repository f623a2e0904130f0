//! Sample task types served by `spindle run` and `spindle demo`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spindle_core::app::AppBuilder;
use spindle_core::domain::HandlerError;
use spindle_core::typed::{Handler, RegistryError, Task};
use tracing::info;

/// Seconds a data-process task waits in Scheduled before it may run.
pub(crate) const PROCESS_IN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EmailDelivery {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Task for EmailDelivery {
    const TYPE: &'static str = "email:delivery";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DataProcess {
    pub data_id: String,
    pub action: String,
    /// Simulated processing time in seconds.
    pub delay: u64,
}

impl Task for DataProcess {
    const TYPE: &'static str = "data:process";
}

pub(crate) struct EmailHandler;

#[async_trait]
impl Handler<EmailDelivery> for EmailHandler {
    async fn handle(&self, task: EmailDelivery) -> Result<(), HandlerError> {
        info!(to = %task.to, subject = %task.subject, body = %task.body, "sending email");
        tokio::time::sleep(Duration::from_secs(1)).await;
        info!(to = %task.to, "email sent");
        Ok(())
    }
}

pub(crate) struct DataProcessHandler;

#[async_trait]
impl Handler<DataProcess> for DataProcessHandler {
    async fn handle(&self, task: DataProcess) -> Result<(), HandlerError> {
        info!(data_id = %task.data_id, action = %task.action, delay = task.delay, "processing data");
        tokio::time::sleep(Duration::from_secs(task.delay)).await;
        info!(data_id = %task.data_id, "data processed");
        Ok(())
    }
}

/// Register both sample handlers and require them at build time.
pub(crate) fn register(builder: AppBuilder) -> Result<AppBuilder, RegistryError> {
    Ok(builder
        .register::<EmailDelivery, _>(EmailHandler)?
        .register::<DataProcess, _>(DataProcessHandler)?
        .expect_tasks(&[EmailDelivery::TYPE, DataProcess::TYPE]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_process_wire_shape() {
        let task: DataProcess =
            serde_json::from_str(r#"{"data_id":"DATA-001","action":"transform","delay":3}"#)
                .unwrap();
        assert_eq!(task.data_id, "DATA-001");
        assert_eq!(task.delay, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_finish_after_simulated_work() {
        let started = tokio::time::Instant::now();
        DataProcessHandler
            .handle(DataProcess {
                data_id: "DATA-002".into(),
                action: "analyze".into(),
                delay: 5,
            })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));

        EmailHandler
            .handle(EmailDelivery {
                to: "user@example.com".into(),
                subject: "hello".into(),
                body: "hi".into(),
            })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn registers_both_types() {
        let app = register(AppBuilder::new()).unwrap().build().await.unwrap();
        let types: Vec<String> = app
            .registered_types()
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        assert_eq!(types, vec!["data:process", "email:delivery"]);
    }
}
