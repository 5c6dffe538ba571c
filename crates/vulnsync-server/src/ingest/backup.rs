//! Export/import of the derived dataset as a replayable command script
//!
//! Export emits one command per line:
//!
//! ```text
//! JSON.SET vulns:CVE-2022-24684 $ '{"cveId":"CVE-2022-24684",...}'
//! SET aliases:GHSA-xxxx 'CVE-2022-24684'
//! LPUSH ingestions:updates '{"started":...}'
//! ```
//!
//! An entity that cannot be read or serialized becomes a `-- <message>` comment and the
//! stream carries on. Import replays every non-comment line through
//! [`CommandStore::execute`].

use futures::{
    future::{self, Either},
    stream::{self, BoxStream},
    Future, StreamExt,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::dataset::DatasetStore;
use super::history::{HistoryStore, HISTORY_KEY};
use crate::store::{
    script::{comment, is_ignorable, quote, tokenize},
    CommandStore, StoreError, StoreResult,
};

/// Outcome of a script import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Commands replayed
    pub executed: usize,
    /// Blank and comment lines
    pub skipped: usize,
}

#[derive(Clone)]
pub struct BackupCodec {
    store: Arc<dyn CommandStore>,
    history: HistoryStore,
    dataset: DatasetStore,
}

impl BackupCodec {
    pub fn new(store: Arc<dyn CommandStore>, history: HistoryStore, dataset: DatasetStore) -> Self {
        Self {
            store,
            history,
            dataset,
        }
    }

    /// `JSON.SET` line per stored record
    pub fn export_vulnerabilities(&self) -> BoxStream<'_, String> {
        self.export_keys(self.dataset.record_keys(), move |key| {
            self.vulnerability_line(key)
        })
    }

    /// `SET` line per alias
    pub fn export_aliases(&self) -> BoxStream<'_, String> {
        self.export_keys(self.dataset.alias_keys(), move |key| self.alias_line(key))
    }

    /// `LPUSH` line for the current run, or a comment when no run exists
    pub async fn export_ingestion(&self) -> String {
        match self.history.current_run().await {
            Ok(Some(run)) => match serde_json::to_string(&run) {
                Ok(json) => format!("LPUSH {} {}\n", HISTORY_KEY, quote(&json)),
                Err(e) => line(comment(e)),
            },
            Ok(None) => line(comment("no ingestion run recorded")),
            Err(e) => line(comment(e)),
        }
    }

    /// Replay a script against the store, stopping at the first failing command.
    pub async fn import_script(&self, script: &[u8]) -> StoreResult<ImportSummary> {
        let text = std::str::from_utf8(script)
            .map_err(|e| StoreError::Syntax(format!("script is not valid UTF-8: {}", e)))?;

        let mut summary = ImportSummary::default();
        for (number, raw) in text.lines().enumerate() {
            if is_ignorable(raw) {
                summary.skipped += 1;
                continue;
            }
            let tokens = tokenize(raw)?;
            let Some((command, args)) = tokens.split_first() else {
                summary.skipped += 1;
                continue;
            };
            if let Err(e) = self.store.execute(command, args).await {
                warn!(line = number + 1, error = %e, "Import stopped at failing command");
                return Err(e);
            }
            summary.executed += 1;
        }

        info!(
            executed = summary.executed,
            skipped = summary.skipped,
            "Import completed"
        );
        Ok(summary)
    }

    /// Scan `keys`, render each with `render`; a failed scan becomes a single comment.
    fn export_keys<'a, K, R, Fut>(&'a self, keys: K, render: R) -> BoxStream<'a, String>
    where
        K: Future<Output = StoreResult<Vec<String>>> + Send + 'a,
        R: Fn(String) -> Fut + Send + 'a,
        Fut: Future<Output = Option<String>> + Send + 'a,
    {
        stream::once(keys)
            .flat_map(|keys| {
                let items: Vec<Result<String, String>> = match keys {
                    Ok(keys) => keys.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(line(comment(e)))],
                };
                stream::iter(items)
            })
            .filter_map(move |item| match item {
                Ok(key) => Either::Left(render(key)),
                Err(comment_line) => Either::Right(future::ready(Some(comment_line))),
            })
            .boxed()
    }

    async fn vulnerability_line(&self, key: String) -> Option<String> {
        let record = match self.dataset.record_at(&key).await {
            Ok(Some(record)) => record,
            // Removed between scan and read
            Ok(None) => return None,
            Err(e) => return Some(line(comment(format!("{}: {}", key, e)))),
        };
        Some(match serde_json::to_string(&record) {
            Ok(json) => format!("JSON.SET {} $ {}\n", key, quote(&json)),
            Err(e) => line(comment(format!("{}: {}", key, e))),
        })
    }

    async fn alias_line(&self, key: String) -> Option<String> {
        match self.dataset.alias_at(&key).await {
            Ok(Some(canonical)) => Some(format!("SET {} {}\n", key, quote(&canonical))),
            Ok(None) => {
                debug!(key, "Alias vanished during export");
                None
            }
            Err(e) => Some(line(comment(format!("{}: {}", key, e)))),
        }
    }
}

fn line(mut text: String) -> String {
    text.push('\n');
    text
}
