//! Retry pass over the failed journal
//!
//! Re-resolves each failed entry against the object store: a document still
//! present under the source prefix is re-run from the top; one that only
//! survives as a markdown artifact is re-run from chunking onward. Recovered
//! entries leave the failed journal; repeat offenders get their error
//! updated in place.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::Pipeline;
use crate::error::{PipelineError, Stage};
use crate::hash;
use crate::router;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryReport {
    pub attempted: u64,
    pub recovered: u64,
    pub still_failing: u64,
    /// neither the source nor the markdown artifact could be found
    pub missing: u64,
}

impl Pipeline {
    /// Re-drive every document in the failed journal.
    pub async fn retry_failed(&self, cancel: &CancellationToken) -> anyhow::Result<RetryReport> {
        let mut report = RetryReport::default();

        for entry in self.journal.failed_entries() {
            if cancel.is_cancelled() {
                break;
            }
            report.attempted += 1;
            let key = entry.filename.clone();

            match self.store.get(&key).await {
                Ok(bytes) => {
                    let strong = hash::strong(&bytes);
                    let fingerprint = hash::fast(&bytes);

                    // force: a failed document may have journaled its
                    // embedding before the failure, and the dedup checks
                    // would otherwise skip the repair
                    match self
                        .execute(&key, bytes, &strong, &fingerprint, true, cancel)
                        .await
                    {
                        Ok(_) => {
                            self.journal.remove_failed(&key)?;
                            report.recovered += 1;
                        }
                        Err(err) => {
                            self.journal
                                .update_failed(&key, &strong, &err.to_string(), err.stage())?;
                            report.still_failing += 1;
                        }
                    }
                }
                Err(PipelineError::ObjectNotFound { .. }) => {
                    match self.retry_from_markdown(&key, cancel).await {
                        Ok(true) => {
                            self.journal.remove_failed(&key)?;
                            report.recovered += 1;
                        }
                        Ok(false) => {
                            self.journal.update_failed(
                                &key,
                                "",
                                "source and markdown artifacts not found",
                                Stage::ObjectStore,
                            )?;
                            report.missing += 1;
                        }
                        Err(err) => {
                            self.journal
                                .update_failed(&key, "", &err.to_string(), err.stage())?;
                            report.still_failing += 1;
                        }
                    }
                }
                Err(err) => {
                    self.journal
                        .update_failed(&key, "", &err.to_string(), err.stage())?;
                    report.still_failing += 1;
                }
            }
        }

        Ok(report)
    }

    /// Attempt recovery from the routed markdown artifact alone. Returns
    /// Ok(false) when no artifact exists either. With the source bytes gone,
    /// the fingerprint is computed over the markdown bytes instead.
    async fn retry_from_markdown(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, PipelineError> {
        let md_key = match router::route(
            key,
            &self.config.source_prefix,
            &self.config.markdown_prefix,
        ) {
            Ok(md_key) => md_key,
            // entry names a key outside the source prefix, nothing to resolve
            Err(_) => return Ok(false),
        };

        let md_bytes = match self.store.get(&md_key).await {
            Ok(bytes) => bytes,
            Err(PipelineError::ObjectNotFound { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };

        let markdown = String::from_utf8_lossy(&md_bytes).into_owned();
        let fingerprint = hash::fast(&md_bytes);
        let filename = key.rsplit('/').next().unwrap_or(key);

        self.finish_from_markdown(key, filename, &markdown, &fingerprint, true, cancel)
            .await?;
        Ok(true)
    }
}
