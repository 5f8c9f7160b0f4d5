use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo::AssessmentStore,
    repo_types::{Assessment, AssessmentData, AssessmentFilter},
};

/// In-process `AssessmentStore` used by the test suites. Rows are kept in
/// insertion order so equal timestamps still list newest first.
#[derive(Default)]
pub struct MemoryAssessmentStore {
    rows: Mutex<Vec<Assessment>>,
}

#[async_trait]
impl AssessmentStore for MemoryAssessmentStore {
    async fn insert(&self, data: AssessmentData, created_by: Uuid) -> anyhow::Result<Assessment> {
        let now = OffsetDateTime::now_utc();
        let a = Assessment {
            id: Uuid::new_v4(),
            data,
            created_by: Some(created_by),
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().unwrap().push(a.clone());
        Ok(a)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Assessment>> {
        Ok(self.rows.lock().unwrap().iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, filter: &AssessmentFilter) -> anyhow::Result<Vec<Assessment>> {
        let rows = self.rows.lock().unwrap();
        let mut found: Vec<Assessment> = rows
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn update(&self, id: Uuid, data: AssessmentData) -> anyhow::Result<Option<Assessment>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(existing) = rows.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        existing.data = data;
        existing.updated_at = OffsetDateTime::now_utc();
        Ok(Some(existing.clone()))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|a| a.id != id);
        Ok(rows.len() < before)
    }
}
