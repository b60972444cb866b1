use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};

use super::error::PersistError;
use super::types::WriteSummary;

/// The store's conflict key for one record type.
pub trait NaturalKey {
    type Key: Eq + Hash + Clone;

    fn natural_key(&self) -> Self::Key;
}

/// Upserts a batch whose natural keys are already unique.
///
/// Implementations resolve conflicts in the store (`ON CONFLICT ... DO UPDATE`); the pipeline
/// only guarantees that no batch carries the same key twice.
pub trait RecordWriter: Send + Sync {
    type Record: NaturalKey + Send + Sync + 'static;

    fn upsert<'a>(
        &'a self,
        records: &'a [Self::Record],
    ) -> BoxFuture<'a, Result<usize, PersistError>>;
}

impl<T> RecordWriter for Arc<T>
where
    T: RecordWriter + ?Sized,
{
    type Record = T::Record;

    fn upsert<'a>(
        &'a self,
        records: &'a [Self::Record],
    ) -> BoxFuture<'a, Result<usize, PersistError>> {
        (**self).upsert(records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduplicated<R> {
    pub records: Vec<R>,
    pub duplicates: usize,
}

/// Keeps the last occurrence of every natural key, preserving the order of the survivors.
pub fn dedupe_last_wins<R: NaturalKey>(records: Vec<R>) -> Deduplicated<R> {
    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let mut unique: Vec<R> = records
        .into_iter()
        .rev()
        .filter(|record| seen.insert(record.natural_key()))
        .collect();
    unique.reverse();

    Deduplicated {
        duplicates: total - unique.len(),
        records: unique,
    }
}

/// Stable identity for rows that have no natural key of their own.
///
/// Joins the identifying fields with `_` and returns the SHA-256 hex digest, so re-ingesting the
/// same row always maps onto the same primary key.
pub fn record_identity<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = parts
        .into_iter()
        .map(|part| part.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("_");
    let digest = Sha256::digest(joined.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Dedupe-then-upsert in front of a [`RecordWriter`].
#[derive(Debug, Clone)]
pub struct DedupUpsertPipeline<W> {
    writer: W,
}

impl<W: RecordWriter> DedupUpsertPipeline<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn dedupe(&self, records: Vec<W::Record>) -> Deduplicated<W::Record> {
        dedupe_last_wins(records)
    }

    pub async fn upsert(&self, unique: &[W::Record]) -> Result<usize, PersistError> {
        if unique.is_empty() {
            return Ok(0);
        }
        self.writer.upsert(unique).await
    }

    pub async fn process(&self, records: Vec<W::Record>) -> Result<WriteSummary, PersistError> {
        let deduplicated = self.dedupe(records);
        if deduplicated.duplicates > 0 {
            tracing::debug!(
                event = "dedupe_dropped_records",
                duplicates = deduplicated.duplicates,
                kept = deduplicated.records.len(),
                "dropped duplicate records before upsert"
            );
        }
        let written = self.upsert(&deduplicated.records).await?;
        Ok(WriteSummary {
            written,
            duplicates: deduplicated.duplicates,
        })
    }
}
