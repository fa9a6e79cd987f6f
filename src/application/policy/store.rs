//! Versioned, hot-reloadable compliance policy store.
//!
//! The store holds one current [`PolicySnapshot`] behind a multi-reader
//! single-writer lock and fans new snapshots out to subscribers. Subscriber
//! callbacks run serially, after the write guard is released, and receive
//! the snapshot directly; they must not call back into the store for it.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::application::audit::AuditLog;
use crate::application::policy::diff::unified_diff;
use crate::domain::compliance::rules::{PolicyDocument, PolicySnapshot};
use crate::domain::errors::PolicySourceError;

type Subscriber = Box<dyn Fn(Arc<PolicySnapshot>) + Send + Sync>;

pub struct PolicyStore {
    snapshot: RwLock<Option<Arc<PolicySnapshot>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    audit: Arc<AuditLog>,
    source_path: Option<PathBuf>,
    watcher_started: AtomicBool,
}

impl PolicyStore {
    pub fn new(audit: Arc<AuditLog>, source_path: Option<PathBuf>) -> Self {
        Self {
            snapshot: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            audit,
            source_path,
            watcher_started: AtomicBool::new(false),
        }
    }

    /// Read and install the policy document from the configured source file.
    pub async fn load_from_source(&self) -> Result<Arc<PolicySnapshot>, PolicySourceError> {
        let path = self
            .source_path
            .as_ref()
            .ok_or(PolicySourceError::NotLoaded)?;
        let text =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PolicySourceError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
        let doc = PolicyDocument::parse(&text)?;
        Ok(self.update(doc).await)
    }

    /// Install a new policy document: canonicalize, checksum, swap the
    /// snapshot atomically, then audit the change and notify subscribers.
    pub async fn update(&self, doc: PolicyDocument) -> Arc<PolicySnapshot> {
        let snapshot = Arc::new(PolicySnapshot {
            version: doc.version.clone(),
            checksum: doc.checksum(),
            loaded_at: chrono::Utc::now(),
            rules: doc.rules,
        });

        let old = {
            let mut guard = self
                .snapshot
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.replace(Arc::clone(&snapshot))
        };

        if let Some(old) = old {
            let diff = unified_diff(
                &old.to_document().canonical_json(),
                &snapshot.to_document().canonical_json(),
                &format!("policies@{}", old.version),
                &format!("policies@{}", snapshot.version),
            );
            self.audit.policy_change(&old, &snapshot, &diff).await;
        }
        info!(
            version = %snapshot.version,
            checksum = %snapshot.checksum,
            rules = snapshot.rules.len(),
            "Policy snapshot installed"
        );

        self.notify(&snapshot);
        snapshot
    }

    /// Current snapshot; fails with `NotLoaded` before the first load.
    pub fn snapshot(&self) -> Result<Arc<PolicySnapshot>, PolicySourceError> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(PolicySourceError::NotLoaded)
    }

    /// Register a callback invoked with every new snapshot. Callbacks run
    /// serially and never under the store's snapshot lock.
    pub fn subscribe(&self, cb: impl Fn(Arc<PolicySnapshot>) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(cb));
    }

    fn notify(&self, snapshot: &Arc<PolicySnapshot>) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for cb in subscribers.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(Arc::clone(snapshot))
            }));
            if result.is_err() {
                error!("Policy subscriber panicked; continuing with remaining subscribers");
            }
        }
    }

    /// Start the background file watcher. Repeated calls are a no-op. The
    /// watcher polls the source, compares content hashes, and reloads on
    /// change; parse errors keep the current snapshot and the loop alive.
    pub fn start_watcher(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let path = self.source_path.clone()?;
        if self.watcher_started.swap(true, Ordering::SeqCst) {
            return None;
        }

        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!(path = %path.display(), interval_secs = interval.as_secs(), "Policy watcher started");
            let mut last_hash: Option<String> = None;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("Policy watcher stopping");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => {
                        let hash = hex::encode(Sha256::digest(text.as_bytes()));
                        if last_hash.as_deref() != Some(hash.as_str()) {
                            match PolicyDocument::parse(&text) {
                                Ok(doc) => {
                                    store.update(doc).await;
                                    last_hash = Some(hash);
                                }
                                Err(e) => {
                                    // Keep the current snapshot; retry on the
                                    // next tick once the file settles.
                                    warn!("Policy watcher: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => warn!(path = %path.display(), "Policy watcher read error: {e}"),
                }
            }
        }))
    }
}

/// Renders the active snapshot as a human-readable Markdown summary.
pub fn render_markdown(snapshot: &PolicySnapshot) -> String {
    let mut out = String::new();
    out.push_str("# Compliance Policies\n");
    out.push_str(&format!("- **Version**: {}\n", snapshot.version));
    out.push_str(&format!("- **Checksum**: `{}`\n", snapshot.checksum));
    out.push_str(&format!(
        "- **Loaded**: {}\n\n",
        snapshot.loaded_at.to_rfc3339()
    ));
    for (rule_id, rule) in &snapshot.rules {
        out.push_str(&format!("## {} | {}\n", rule_id, rule.rule_name));
        out.push_str(&format!("- Source: **{}**\n", rule.regulation_source));
        out.push_str(&format!("- Severity: **{}**\n", rule.severity));
        out.push_str(&format!("- Applies To: {}\n", rule.applies_to.join(", ")));
        if !rule.params.is_empty() {
            let params = serde_json::to_string(&rule.params).unwrap_or_default();
            out.push_str(&format!("- Params: `{params}`\n"));
        }
        out.push('\n');
        out.push_str(&rule.description);
        out.push_str("\n\n");
    }
    out
}
