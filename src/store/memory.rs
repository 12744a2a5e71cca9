//! In-memory [`Store`] implementation for tests.
//!
//! Uses maps and a vector behind `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Store;
use crate::categories::Category;
use crate::models::{DocumentRef, InsightRecord, ProcessingJob, UsageEvent};

#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, DocumentRef>>,
    insights: RwLock<HashMap<(String, Category), InsightRecord>>,
    jobs: RwLock<HashMap<String, ProcessingJob>>,
    usage: RwLock<Vec<UsageEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &DocumentRef) -> Result<()> {
        write(&self.documents).insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRef>> {
        Ok(read(&self.documents).get(id).cloned())
    }

    async fn mark_processed(&self, id: &str) -> Result<()> {
        if let Some(doc) = write(&self.documents).get_mut(id) {
            doc.processed = true;
        }
        Ok(())
    }

    async fn upsert_insight(&self, insight: &InsightRecord) -> Result<()> {
        write(&self.insights).insert(
            (insight.document_id.clone(), insight.category),
            insight.clone(),
        );
        Ok(())
    }

    async fn get_insights(&self, document_id: &str) -> Result<Vec<InsightRecord>> {
        let mut found: Vec<InsightRecord> = read(&self.insights)
            .values()
            .filter(|i| i.document_id == document_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.category.key().cmp(b.category.key()));
        Ok(found)
    }

    async fn upsert_job(&self, job: &ProcessingJob) -> Result<()> {
        write(&self.jobs).insert(job.document_id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, document_id: &str) -> Result<Option<ProcessingJob>> {
        Ok(read(&self.jobs).get(document_id).cloned())
    }

    async fn append_usage(&self, event: &UsageEvent) -> Result<()> {
        write(&self.usage).push(event.clone());
        Ok(())
    }

    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageEvent>> {
        let mut events: Vec<UsageEvent> = read(&self.usage)
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}
