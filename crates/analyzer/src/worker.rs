//! The analyzer worker pool.
//!
//! Each worker loops on a 5-second blocking poll of the task queue and
//! processes one task at a time. Every failure between claiming a task
//! and persisting a report is captured as the run's `ai_report` with
//! `ai_status = failed`; nothing is retried automatically — re-analysis
//! is an explicit operator/user request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rt_bus::EventBus;
use rt_domain::config::AnalyzerConfig;
use rt_domain::error::{Error, Result};
use rt_domain::run::AiStatus;
use rt_logstore::LogStore;
use rt_protocol::{AnalysisResult, AnalysisTask, BusEvent};
use rt_store::MetadataStore;

use crate::model::{CompletionRequest, ModelClient};
use crate::prompt::build_user_prompt;
use crate::truncate::truncate_lines;

pub struct Analyzer {
    store: Arc<MetadataStore>,
    logstore: Arc<dyn LogStore>,
    bus: Arc<dyn EventBus>,
    model: Arc<dyn ModelClient>,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(
        store: Arc<MetadataStore>,
        logstore: Arc<dyn LogStore>,
        bus: Arc<dyn EventBus>,
        model: Arc<dyn ModelClient>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            store,
            logstore,
            bus,
            model,
            config: config.clamped(),
        }
    }

    /// Spawn the worker pool. Workers exit when `shutdown` is cancelled.
    pub fn spawn_workers(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_id| {
                let analyzer = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { analyzer.worker_loop(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, shutdown: CancellationToken) {
        tracing::info!(worker_id, "analyzer worker started");
        let poll = Duration::from_secs(self.config.dequeue_timeout_secs);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                dequeued = self.bus.dequeue_task(poll) => match dequeued {
                    Ok(Some(task)) => self.process(&task).await,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(worker_id, error = %e, "dequeue failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
        tracing::info!(worker_id, "analyzer worker stopped");
    }

    /// Process one task end to end. Never returns an error: every failure
    /// is materialized into persisted state and a result notification.
    pub async fn process(&self, task: &AnalysisTask) {
        tracing::info!(run_id = %task.run_id, user_id = %task.user_id, "analysis started");

        match self.run_analysis(task).await {
            Ok(report_len) => {
                tracing::info!(run_id = %task.run_id, report_len, "analysis completed");
            }
            Err(e) => {
                tracing::warn!(run_id = %task.run_id, error = %e, "analysis failed");
                self.fail(task.run_id, &e.to_string());
            }
        }
    }

    async fn run_analysis(&self, task: &AnalysisTask) -> Result<usize> {
        // 1. The run must still exist. A missing run cannot carry a
        //    report; surface the failure on the result channel only.
        let detail = match self.store.get_run(task.run_id) {
            Ok(d) => d,
            Err(Error::NotFound(_)) => {
                self.bus.publish_result(AnalysisResult {
                    run_id: task.run_id,
                    status: AiStatus::Failed,
                    message: format!("run {} not found", task.run_id),
                });
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        // 2. Resolve effective settings and gate on them.
        let settings = self
            .store
            .resolve_effective_settings(task.user_id, detail.project_id)?;
        if !settings.ai_enabled {
            return Err(Error::InvalidInput("AI analysis is disabled".into()));
        }
        if settings.ai_api_key.is_empty() {
            return Err(Error::InvalidInput("no AI API key configured".into()));
        }

        // 3. Claim the run.
        self.store.set_ai_status(task.run_id, AiStatus::Processing)?;
        self.bus.publish_event(BusEvent::RunUpdate {
            run_id: task.run_id,
            status: None,
            exit_code: None,
            ai_status: Some(AiStatus::Processing),
            ai_report: None,
        });

        // 4. Fetch the captured log.
        let lines = self.logstore.query(task.run_id).await?;
        if lines.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no log lines found for run {}",
                task.run_id
            )));
        }

        // 5-6. Truncate and build the prompt.
        let content = truncate_lines(
            &lines,
            settings.ai_max_log_lines,
            settings.ai_truncate_strategy,
        );
        let user_prompt =
            build_user_prompt(detail.run.status, detail.run.exit_code, &content);

        // 7. Call the model.
        let completion = self
            .model
            .complete(CompletionRequest {
                base_url: settings.ai_base_url,
                api_key: settings.ai_api_key,
                model: settings.ai_model,
                system_prompt: settings.ai_system_prompt,
                user_prompt,
                max_tokens: settings.ai_max_tokens,
                timeout: Duration::from_secs(self.config.model_timeout_secs),
            })
            .await?;

        tracing::debug!(
            run_id = %task.run_id,
            tokens_used = completion.tokens_used,
            "model call finished"
        );

        // 8. Persist and announce.
        self.store
            .set_ai_report(task.run_id, &completion.text, AiStatus::Completed)?;
        self.bus.publish_event(BusEvent::RunUpdate {
            run_id: task.run_id,
            status: None,
            exit_code: None,
            ai_status: Some(AiStatus::Completed),
            ai_report: Some(completion.text.clone()),
        });
        self.bus.publish_result(AnalysisResult {
            run_id: task.run_id,
            status: AiStatus::Completed,
            message: "analysis completed".into(),
        });

        Ok(completion.text.len())
    }

    /// Persist `message` as the run's report with `ai_status = failed`
    /// and announce the outcome.
    fn fail(&self, run_id: Uuid, message: &str) {
        if let Err(e) = self.store.set_ai_report(run_id, message, AiStatus::Failed) {
            // Fatal persistence error: the run keeps its prior state.
            tracing::error!(run_id = %run_id, error = %e, "could not persist failure report");
        }
        self.bus.publish_event(BusEvent::RunUpdate {
            run_id,
            status: None,
            exit_code: None,
            ai_status: Some(AiStatus::Failed),
            ai_report: Some(message.to_owned()),
        });
        self.bus.publish_result(AnalysisResult {
            run_id,
            status: AiStatus::Failed,
            message: message.to_owned(),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rt_bus::InProcessBus;
    use rt_domain::run::RunStatus;
    use rt_domain::settings::UserSettings;
    use rt_logstore::MemoryStore;
    use rt_protocol::{LineRecord, LogLevel};

    use crate::model::Completion;

    struct StubModel {
        requests: Mutex<Vec<CompletionRequest>>,
        reply: Result<String>,
    }

    impl StubModel {
        fn ok(text: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply: Ok(text.into()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply: Err(Error::Model(message.into())),
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelClient for StubModel {
        async fn complete(&self, req: CompletionRequest) -> Result<Completion> {
            self.requests.lock().push(req);
            match &self.reply {
                Ok(text) => Ok(Completion {
                    text: text.clone(),
                    tokens_used: 42,
                }),
                Err(e) => Err(Error::Model(e.to_string())),
            }
        }
    }

    struct Fixture {
        store: Arc<MetadataStore>,
        logstore: Arc<MemoryStore>,
        bus: Arc<InProcessBus>,
        user_id: Uuid,
        run_id: Uuid,
    }

    fn fixture(enabled: bool, api_key: Option<&str>) -> Fixture {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let user = store.create_user("alice", "pw", false).unwrap();
        let project = store.get_or_create_project(user.id, "myapp").unwrap();
        let group = store.get_or_create_group(project.id, "build").unwrap();
        let run = store.create_run(group.id, AiStatus::Pending).unwrap();
        store
            .finalize_run(run.id, RunStatus::Completed, Some(0))
            .unwrap();

        let mut settings = UserSettings::defaults_for(user.id);
        settings.ai_enabled = enabled;
        settings.ai_auto_analyze = true;
        settings.ai_api_key = api_key.map(String::from);
        settings.ai_model = "gpt-4o-mini".into();
        settings.ai_system_prompt = "be terse".into();
        store.upsert_user_settings(&settings).unwrap();

        Fixture {
            store,
            logstore: Arc::new(MemoryStore::default()),
            bus: Arc::new(InProcessBus::ephemeral()),
            user_id: user.id,
            run_id: run.id,
        }
    }

    fn analyzer(f: &Fixture, model: Arc<dyn ModelClient>) -> Analyzer {
        Analyzer::new(
            f.store.clone(),
            f.logstore.clone(),
            f.bus.clone(),
            model,
            AnalyzerConfig::default(),
        )
    }

    fn task(f: &Fixture) -> AnalysisTask {
        AnalysisTask {
            run_id: f.run_id,
            user_id: f.user_id,
            enqueued_at: Utc::now(),
        }
    }

    async fn seed_lines(f: &Fixture, contents: &[&str]) {
        let lines: Vec<LineRecord> = contents
            .iter()
            .map(|c| LineRecord {
                timestamp: Utc::now(),
                level: LogLevel::Stdout,
                content: (*c).into(),
            })
            .collect();
        f.logstore
            .append(f.run_id, f.user_id, "myapp", &lines)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn happy_path_persists_report_and_announces() {
        let f = fixture(true, Some("sk-test"));
        seed_lines(&f, &["compiling", "done"]).await;

        let mut events = f.bus.subscribe_events();
        let mut results = f.bus.subscribe_results();

        let model = Arc::new(StubModel::ok("all good"));
        analyzer(&f, model.clone()).process(&task(&f)).await;

        let detail = f.store.get_run(f.run_id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Completed);
        assert_eq!(detail.run.ai_report.as_deref(), Some("all good"));

        // pending → processing → completed, observed on the event channel.
        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            BusEvent::RunUpdate { ai_status: Some(AiStatus::Processing), .. }
        ));
        let second = events.recv().await.unwrap();
        assert!(matches!(
            second,
            BusEvent::RunUpdate { ai_status: Some(AiStatus::Completed), ai_report: Some(_), .. }
        ));

        let result = results.recv().await.unwrap();
        assert_eq!(result.status, AiStatus::Completed);
    }

    #[tokio::test]
    async fn model_request_is_built_from_effective_settings() {
        let f = fixture(true, Some("sk-test"));
        seed_lines(&f, &["hello world"]).await;

        let model = Arc::new(StubModel::ok("report"));
        analyzer(&f, model.clone()).process(&task(&f)).await;

        let requests = model.requests.lock();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.api_key, "sk-test");
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.system_prompt, "be terse");
        assert!(req.user_prompt.contains("Execution Status: completed"));
        assert!(req.user_prompt.contains("Exit Code: 0"));
        assert!(req.user_prompt.contains("hello world"));
    }

    #[tokio::test]
    async fn disabled_ai_fails_with_specific_message() {
        let f = fixture(false, Some("sk-test"));
        seed_lines(&f, &["x"]).await;

        let model = Arc::new(StubModel::ok("unreachable"));
        analyzer(&f, model.clone()).process(&task(&f)).await;

        let detail = f.store.get_run(f.run_id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Failed);
        assert!(detail
            .run
            .ai_report
            .unwrap()
            .contains("AI analysis is disabled"));
        assert!(model.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_model_call() {
        let f = fixture(true, None);
        seed_lines(&f, &["x"]).await;

        let model = Arc::new(StubModel::ok("unreachable"));
        analyzer(&f, model.clone()).process(&task(&f)).await;

        let detail = f.store.get_run(f.run_id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Failed);
        assert!(detail.run.ai_report.unwrap().contains("no AI API key"));
        assert!(model.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_log_fails_after_processing() {
        let f = fixture(true, Some("sk-test"));
        // No lines seeded.
        let model = Arc::new(StubModel::ok("unreachable"));
        analyzer(&f, model.clone()).process(&task(&f)).await;

        let detail = f.store.get_run(f.run_id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Failed);
        assert!(detail.run.ai_report.unwrap().contains("no log lines"));
    }

    #[tokio::test]
    async fn model_failure_is_captured_as_report() {
        let f = fixture(true, Some("sk-test"));
        seed_lines(&f, &["x"]).await;

        let model = Arc::new(StubModel::failing("rate limited"));
        analyzer(&f, model).process(&task(&f)).await;

        let detail = f.store.get_run(f.run_id).unwrap();
        assert_eq!(detail.run.ai_status, AiStatus::Failed);
        assert!(detail.run.ai_report.unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn missing_run_publishes_failed_result_only() {
        let f = fixture(true, Some("sk-test"));
        let mut results = f.bus.subscribe_results();

        let ghost = AnalysisTask {
            run_id: Uuid::new_v4(),
            user_id: f.user_id,
            enqueued_at: Utc::now(),
        };
        let model = Arc::new(StubModel::ok("unreachable"));
        analyzer(&f, model).process(&ghost).await;

        let result = results.recv().await.unwrap();
        assert_eq!(result.status, AiStatus::Failed);
        assert!(result.message.contains("not found"));
    }

    #[tokio::test]
    async fn worker_pool_drains_the_queue() {
        let f = fixture(true, Some("sk-test"));
        seed_lines(&f, &["line"]).await;
        let mut results = f.bus.subscribe_results();

        let model = Arc::new(StubModel::ok("pooled report"));
        let analyzer = Arc::new(analyzer(&f, model));
        let shutdown = CancellationToken::new();
        let handles = analyzer.spawn_workers(shutdown.clone());

        f.bus.enqueue_task(task(&f)).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("worker should finish the task")
            .unwrap();
        assert_eq!(result.status, AiStatus::Completed);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
