//! Application wiring: stores, adapters and services composed into one
//! running system.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::audit::AuditLog;
use crate::application::compliance::ComplianceEvaluator;
use crate::application::execution::ExecutionService;
use crate::application::policy::{PolicyStore, default_document, render_markdown};
use crate::application::router::AgentRouter;
use crate::application::session_log::SessionLog;
use crate::application::supervisor::Supervisor;
use crate::application::sync::PortfolioSynchronizer;
use crate::config::{Config, Mode};
use crate::domain::ports::{BrokerService, LlmService};
use crate::domain::repositories::{PortfolioStore, SessionStore};
use crate::infrastructure::alpaca::AlpacaBrokerService;
use crate::infrastructure::llm::LlmClient;
use crate::infrastructure::mock::{MockBrokerService, MockLlmService};
use crate::infrastructure::persistence::{Database, SqlitePortfolioStore, SqliteSessionStore};

const TURN_TIMEOUT: Duration = Duration::from_secs(120);

pub struct App {
    pub config: Config,
    pub store: Arc<dyn PortfolioStore>,
    pub sessions: Arc<SessionLog>,
    pub broker: Arc<dyn BrokerService>,
    pub policy: Arc<PolicyStore>,
    pub evaluator: Arc<ComplianceEvaluator>,
    pub execution: Arc<ExecutionService>,
    pub synchronizer: Arc<PortfolioSynchronizer>,
    pub supervisor: Arc<Supervisor>,
    shutdown: watch::Sender<bool>,
}

impl App {
    pub async fn build(config: Config) -> Result<Self> {
        let database = Database::new(&config.database).await?;
        let store: Arc<dyn PortfolioStore> =
            Arc::new(SqlitePortfolioStore::new(database.pool.clone()));
        let session_store: Arc<dyn SessionStore> =
            Arc::new(SqliteSessionStore::new(database.pool.clone()));
        let sessions = Arc::new(SessionLog::new(session_store));

        let broker: Arc<dyn BrokerService> = match config.mode {
            Mode::Mock => {
                info!("MODE=mock: broker adapter running with synthetic data");
                Arc::new(MockBrokerService::new())
            }
            Mode::Live if !config.broker.has_credentials() => {
                // Visible by design: trading without keys must never look
                // like live trading.
                warn!("Broker credentials missing; broker adapter running in MOCK mode");
                Arc::new(MockBrokerService::new())
            }
            Mode::Live => Arc::new(AlpacaBrokerService::new(&config.broker)),
        };

        let llm: Arc<dyn LlmService> = match config.mode {
            Mode::Mock => Arc::new(MockLlmService::default()),
            Mode::Live => Arc::new(LlmClient::new(&config.llm)?),
        };

        let audit = Arc::new(AuditLog::new(Some(Arc::clone(&store))));
        let policy = Arc::new(PolicyStore::new(
            Arc::clone(&audit),
            config.policy.path.clone(),
        ));
        // Keep a human-readable rendering of the active rule set next to
        // the source document.
        if let Some(path) = &config.policy.path {
            let summary_path = path.with_file_name("Policies.md");
            policy.subscribe(move |snapshot| {
                if let Err(e) = std::fs::write(&summary_path, render_markdown(&snapshot)) {
                    warn!("Failed to write policy summary: {e}");
                }
            });
        }
        match config.policy.path {
            Some(_) => {
                policy
                    .load_from_source()
                    .await
                    .context("Failed to load policy document")?;
            }
            None => {
                let mut doc = default_document();
                if let Some(rule) = doc.rules.get_mut("CONC-001")
                    && let Some(number) = serde_json::Number::from_f64(config.max_position_size)
                {
                    rule.params
                        .insert("max_position".to_string(), serde_json::Value::Number(number));
                }
                policy.update(doc).await;
            }
        }

        let evaluator = Arc::new(ComplianceEvaluator::new(
            Arc::clone(&policy),
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::clone(&audit),
        ));
        let execution = Arc::new(ExecutionService::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::clone(&evaluator),
            config.order_poll_attempts,
            Duration::from_millis(config.order_poll_interval_ms),
        ));
        let synchronizer = Arc::new(PortfolioSynchronizer::new(
            Arc::clone(&store),
            Arc::clone(&broker),
        ));
        let router = Arc::new(AgentRouter::new(Arc::clone(&llm)));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&llm),
            router,
            Arc::clone(&execution),
            Arc::clone(&sessions),
            Arc::clone(&store),
            Arc::clone(&broker),
            TURN_TIMEOUT,
            Duration::from_secs(config.llm.token_timeout_secs),
        ));

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            sessions,
            broker,
            policy,
            evaluator,
            execution,
            synchronizer,
            supervisor,
            shutdown,
        })
    }

    /// Spawn the policy watcher and the portfolio synchronizer. They stop
    /// when [`App::shutdown`] fires.
    pub fn start_background(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(handle) = self.policy.start_watcher(
            Duration::from_secs(self.config.policy.watch_interval_secs),
            self.shutdown.subscribe(),
        ) {
            handles.push(handle);
        }
        handles.push(
            Arc::clone(&self.synchronizer).spawn(self.shutdown.subscribe()),
        );
        handles
    }

    /// Signal background tasks to stop after their current iteration.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
