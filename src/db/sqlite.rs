use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::bkt::types::{
    BktParameters, ObservationContext, Skill, SkillObservation, SkillType, StoredObservation,
};
use crate::db::schema::{schema_statements, SCHEMA_VERSION};
use crate::db::{
    BktStore, ObservationRepository, ParameterRepository, PurgeCounts, SkillCatalogRepository,
    StoreError,
};

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nix-skill-tracer")
        .join("bkt.db")
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "skill tracing database ready");
        Ok(store)
    }

    /// Private in-memory database; a single connection that never expires.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn schema_version(&self) -> Result<Option<String>, StoreError> {
        let version: Option<String> =
            sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
                .fetch_optional(&self.pool)
                .await?;
        Ok(version)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        // missing metadata table reads as "not migrated"
        let current = self.schema_version().await.unwrap_or(None);
        if current.as_deref() == Some(SCHEMA_VERSION) {
            return Ok(());
        }

        for stmt in schema_statements() {
            sqlx::query(&stmt).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
        )
        .bind(SCHEMA_VERSION)
        .execute(&self.pool)
        .await?;

        tracing::debug!(version = SCHEMA_VERSION, "skill tracing schema applied");
        Ok(())
    }
}

fn row_to_parameters(row: &SqliteRow) -> Result<BktParameters, StoreError> {
    Ok(BktParameters {
        user_id: row.try_get("user_id")?,
        skill_id: row.try_get("skill_id")?,
        prior_knowledge: row.try_get("prior_knowledge")?,
        learning_rate: row.try_get("learning_rate")?,
        slip_probability: row.try_get("slip_probability")?,
        guess_probability: row.try_get("guess_probability")?,
        current_mastery: row.try_get("current_mastery")?,
        confidence: row.try_get("confidence")?,
        observation_count: row.try_get("observation_count")?,
        last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
    })
}

fn row_to_observation(row: &SqliteRow) -> Result<StoredObservation, StoreError> {
    let uid: String = row.try_get("observation_uid")?;
    let observation_id = Uuid::parse_str(&uid)
        .map_err(|e| StoreError::Corrupt(format!("observation_uid {uid}: {e}")))?;
    let context_raw: String = row.try_get("context")?;
    let context: ObservationContext = serde_json::from_str(&context_raw)?;

    Ok(StoredObservation {
        id: row.try_get("id")?,
        observation: SkillObservation {
            observation_id,
            skill_id: row.try_get("skill_id")?,
            user_id: row.try_get("user_id")?,
            success: row.try_get("success")?,
            context,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            confidence_self_report: row.try_get("confidence_self_report")?,
        },
    })
}

fn row_to_skill(row: &SqliteRow) -> Result<Skill, StoreError> {
    let skill_type: String = row.try_get("skill_type")?;
    let prerequisites: String = row.try_get("prerequisites")?;
    let objectives: String = row.try_get("learning_objectives")?;
    let examples: String = row.try_get("examples")?;

    Ok(Skill {
        skill_id: row.try_get("skill_id")?,
        name: row.try_get("name")?,
        skill_type: SkillType::parse(&skill_type),
        prerequisites: serde_json::from_str(&prerequisites)?,
        difficulty: row.try_get("difficulty")?,
        learning_objectives: serde_json::from_str(&objectives)?,
        examples: serde_json::from_str(&examples)?,
    })
}

const SELECT_PARAMETERS: &str = r#"
    SELECT "skill_id", "user_id", "prior_knowledge", "learning_rate", "slip_probability",
           "guess_probability", "current_mastery", "confidence", "observation_count", "last_updated"
    FROM "bkt_parameters"
"#;

#[async_trait]
impl ParameterRepository for SqliteStore {
    async fn load_all_parameters(&self) -> Result<Vec<BktParameters>, StoreError> {
        let sql = format!(r#"{SELECT_PARAMETERS} ORDER BY "user_id", "skill_id""#);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_parameters).collect()
    }

    async fn save_parameters(&self, params: &BktParameters) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO "bkt_parameters"
                ("skill_id", "user_id", "prior_knowledge", "learning_rate", "slip_probability",
                 "guess_probability", "current_mastery", "confidence", "observation_count", "last_updated")
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&params.skill_id)
        .bind(&params.user_id)
        .bind(params.prior_knowledge)
        .bind(params.learning_rate)
        .bind(params.slip_probability)
        .bind(params.guess_probability)
        .bind(params.current_mastery)
        .bind(params.confidence)
        .bind(params.observation_count)
        .bind(params.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn parameters_for_user(&self, user_id: &str) -> Result<Vec<BktParameters>, StoreError> {
        let sql = format!(r#"{SELECT_PARAMETERS} WHERE "user_id" = ? ORDER BY "skill_id""#);
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_parameters).collect()
    }
}

#[async_trait]
impl ObservationRepository for SqliteStore {
    async fn append_observation(&self, observation: &SkillObservation) -> Result<i64, StoreError> {
        let context = serde_json::to_string(&observation.context)?;
        let result = sqlx::query(
            r#"
            INSERT INTO "skill_observations"
                ("observation_uid", "skill_id", "user_id", "success", "context", "timestamp",
                 "confidence_self_report")
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(observation.observation_id.to_string())
        .bind(&observation.skill_id)
        .bind(&observation.user_id)
        .bind(observation.success)
        .bind(context)
        .bind(observation.timestamp)
        .bind(observation.confidence_self_report)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn observations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "id", "observation_uid", "skill_id", "user_id", "success", "context",
                   "timestamp", "confidence_self_report"
            FROM "skill_observations"
            WHERE "user_id" = ?
            ORDER BY "id"
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_observation).collect()
    }
}

#[async_trait]
impl SkillCatalogRepository for SqliteStore {
    async fn cache_skills(&self, skills: &[Skill]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"DELETE FROM "skills""#)
            .execute(&mut *tx)
            .await?;
        for skill in skills {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO "skills"
                    ("skill_id", "name", "skill_type", "prerequisites", "difficulty",
                     "learning_objectives", "examples")
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&skill.skill_id)
            .bind(&skill.name)
            .bind(skill.skill_type.as_str())
            .bind(serde_json::to_string(&skill.prerequisites)?)
            .bind(skill.difficulty)
            .bind(serde_json::to_string(&skill.learning_objectives)?)
            .bind(serde_json::to_string(&skill.examples)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_skills(&self) -> Result<Vec<Skill>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "skill_id", "name", "skill_type", "prerequisites", "difficulty",
                   "learning_objectives", "examples"
            FROM "skills"
            ORDER BY "skill_id"
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_skill).collect()
    }
}

#[async_trait]
impl BktStore for SqliteStore {
    async fn purge_user(&self, user_id: &str) -> Result<PurgeCounts, StoreError> {
        let mut tx = self.pool.begin().await?;

        let parameters = sqlx::query(r#"DELETE FROM "bkt_parameters" WHERE "user_id" = ?"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let observations = sqlx::query(r#"DELETE FROM "skill_observations" WHERE "user_id" = ?"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(PurgeCounts {
            parameters,
            observations,
        })
    }
}
