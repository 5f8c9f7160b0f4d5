use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgArguments, query::QueryAs, PgPool, Postgres};
use uuid::Uuid;

use super::repo_types::{Assessment, AssessmentData, AssessmentFilter, AssessmentRow};

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn insert(&self, data: AssessmentData, created_by: Uuid) -> anyhow::Result<Assessment>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Assessment>>;
    /// Newest first.
    async fn list(&self, filter: &AssessmentFilter) -> anyhow::Result<Vec<Assessment>>;
    /// Overwrites every editable field. `None` when the row is gone.
    async fn update(&self, id: Uuid, data: AssessmentData) -> anyhow::Result<Option<Assessment>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgAssessmentStore {
    db: PgPool,
}

impl PgAssessmentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const DATA_COLUMNS: &str = "responsible_name, document_number, phone_contact, household_members, \
     vulnerable_groups, full_address, reference_point, gps_latitude, gps_longitude, \
     structure_type, damage_level, losses, losses_other, evidence_files, urgent_need, \
     urgent_need_other";

const ASSESSMENT_COLUMNS: &str = "id, responsible_name, document_number, phone_contact, \
     household_members, vulnerable_groups, full_address, reference_point, gps_latitude, \
     gps_longitude, structure_type, damage_level, losses, losses_other, evidence_files, \
     urgent_need, urgent_need_other, created_by, created_at, updated_at";

fn texts<T: std::fmt::Display>(values: &[T]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

/// Binds the editable fields in `DATA_COLUMNS` order.
fn bind_data<'q>(
    q: QueryAs<'q, Postgres, AssessmentRow, PgArguments>,
    d: &'q AssessmentData,
) -> QueryAs<'q, Postgres, AssessmentRow, PgArguments> {
    q.bind(&d.responsible_name)
        .bind(&d.document_number)
        .bind(&d.phone_contact)
        .bind(d.household_members)
        .bind(texts(&d.vulnerable_groups))
        .bind(&d.full_address)
        .bind(&d.reference_point)
        .bind(d.gps_latitude)
        .bind(d.gps_longitude)
        .bind(d.structure_type.as_str())
        .bind(d.damage_level.as_str())
        .bind(texts(&d.losses))
        .bind(&d.losses_other)
        .bind(&d.evidence_files)
        .bind(d.urgent_need.as_str())
        .bind(&d.urgent_need_other)
}

#[async_trait]
impl AssessmentStore for PgAssessmentStore {
    async fn insert(&self, data: AssessmentData, created_by: Uuid) -> anyhow::Result<Assessment> {
        let sql = format!(
            r#"
            INSERT INTO assessments (id, created_by, {DATA_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {ASSESSMENT_COLUMNS}
            "#
        );
        let q = sqlx::query_as::<_, AssessmentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(created_by);
        let row = bind_data(q, &data)
            .fetch_one(&self.db)
            .await
            .context("insert assessment")?;
        Assessment::try_from(row)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Assessment>> {
        let row = sqlx::query_as::<_, AssessmentRow>(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find assessment")?;
        row.map(Assessment::try_from).transpose()
    }

    async fn list(&self, filter: &AssessmentFilter) -> anyhow::Result<Vec<Assessment>> {
        let rows = sqlx::query_as::<_, AssessmentRow>(&format!(
            r#"
            SELECT {ASSESSMENT_COLUMNS}
            FROM assessments
            WHERE ($1::text IS NULL OR damage_level = $1)
              AND ($2::text IS NULL OR structure_type = $2)
              AND ($3::text IS NULL OR urgent_need = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.damage_level.map(|d| d.as_str()))
        .bind(filter.structure_type.map(|s| s.as_str()))
        .bind(filter.urgent_need.map(|u| u.as_str()))
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.db)
        .await
        .context("list assessments")?;
        rows.into_iter().map(Assessment::try_from).collect()
    }

    async fn update(&self, id: Uuid, data: AssessmentData) -> anyhow::Result<Option<Assessment>> {
        let sql = format!(
            r#"
            UPDATE assessments
               SET ({DATA_COLUMNS}, updated_at) =
                   ($2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, now())
             WHERE id = $1
            RETURNING {ASSESSMENT_COLUMNS}
            "#
        );
        let q = sqlx::query_as::<_, AssessmentRow>(&sql).bind(id);
        let row = bind_data(q, &data)
            .fetch_optional(&self.db)
            .await
            .context("update assessment")?;
        row.map(Assessment::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM assessments WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete assessment")?;
        Ok(res.rows_affected() > 0)
    }
}
