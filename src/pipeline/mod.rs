use std::{fmt::Display, future::Future, time::Duration};

use futures::future::join_all;

/// Progress reported after every completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    /// One-based index of the batch that just finished.
    pub batch: usize,
    pub batches: usize,
}

impl BatchProgress {
    /// Completion percentage, rounded half up.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = (self.processed * 100 + self.total / 2) / self.total;
        percent.min(100) as u8
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub batches: usize,
}

/// Runs an operation over items in fixed-size concurrent batches with a
/// pause between batches.
///
/// Failures are counted and logged but never stop the run.
#[derive(Debug, Clone, Copy)]
pub struct BatchPipeline {
    batch_size: usize,
    delay: Duration,
}

impl BatchPipeline {
    /// A zero batch size is treated as one.
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn run<T, F, Fut, E, P>(&self, items: Vec<T>, op: F, mut on_progress: P) -> BatchOutcome
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
        P: FnMut(&BatchProgress),
    {
        let total = items.len();
        let batches = total.div_ceil(self.batch_size);
        let mut outcome = BatchOutcome {
            total,
            batches,
            ..BatchOutcome::default()
        };

        let mut items = items.into_iter();
        for batch in 1..=batches {
            if batch > 1 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let chunk: Vec<T> = items.by_ref().take(self.batch_size).collect();
            let results = join_all(chunk.into_iter().map(&op)).await;
            for result in results {
                match result {
                    Ok(()) => outcome.succeeded += 1,
                    Err(error) => {
                        outcome.failed += 1;
                        tracing::warn!(batch, error = %error, "batch item failed");
                    }
                }
            }

            let progress = BatchProgress {
                processed: outcome.succeeded + outcome.failed,
                succeeded: outcome.succeeded,
                failed: outcome.failed,
                total,
                batch,
                batches,
            };
            tracing::debug!(batch, batches, processed = progress.processed, total, "batch finished");
            on_progress(&progress);
        }

        outcome
    }
}
