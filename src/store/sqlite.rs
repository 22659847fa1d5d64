// SQLite store behind the `database` feature. Every multi-row commit runs
// in a single sqlx transaction; the version lock is a compare-and-set
// UPDATE guarded by `locked = 0`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::deal::activity::{ActivityDraft, ActivityKind, DealActivity};
use crate::deal::errors::DealError;
use crate::deal::stage::DealStage;
use crate::deal::traits::{ApprovalCommit, DealStore, LockOutcome, TransitionCommit};
use crate::deal::types::{
    ArtifactRef, Deal, DealVersion, DispatchHandoff, NewDeal, VersionPayload,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) and migrate the database.
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        auto_migrate: bool,
    ) -> Result<Self, DealError> {
        if !sqlx::Sqlite::database_exists(database_url)
            .await
            .map_err(storage)?
        {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url)
                .await
                .map_err(storage)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(storage)?;
        if auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| DealError::Storage(e.to_string()))?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
    }
}

fn storage(err: sqlx::Error) -> DealError {
    DealError::Storage(err.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid, DealError> {
    Uuid::parse_str(s).map_err(|e| DealError::Storage(format!("bad uuid {s}: {e}")))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, DealError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DealError::Storage(format!("bad timestamp {s}: {e}")))
}

fn parse_stage(s: &str) -> Result<DealStage, DealError> {
    DealStage::parse(s).ok_or_else(|| DealError::Storage(format!("unknown stage {s}")))
}

fn deal_from_row(row: &SqliteRow) -> Result<Deal, DealError> {
    Ok(Deal {
        id: parse_uuid(&row.try_get::<String, _>("id").map_err(storage)?)?,
        company_id: parse_uuid(&row.try_get::<String, _>("company_id").map_err(storage)?)?,
        contact_id: parse_uuid(&row.try_get::<String, _>("contact_id").map_err(storage)?)?,
        title: row.try_get("title").map_err(storage)?,
        stage: parse_stage(&row.try_get::<String, _>("stage").map_err(storage)?)?,
        active_version_id: parse_uuid(
            &row.try_get::<String, _>("active_version_id").map_err(storage)?,
        )?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(storage)?)?,
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(storage)?)?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<DealVersion, DealError> {
    let payload: String = row.try_get("payload").map_err(storage)?;
    let payload: VersionPayload =
        serde_json::from_str(&payload).map_err(|e| DealError::Storage(e.to_string()))?;
    let locked_at: Option<String> = row.try_get("locked_at").map_err(storage)?;
    let locked_by: Option<String> = row.try_get("locked_by").map_err(storage)?;
    Ok(DealVersion {
        id: parse_uuid(&row.try_get::<String, _>("id").map_err(storage)?)?,
        deal_id: parse_uuid(&row.try_get::<String, _>("deal_id").map_err(storage)?)?,
        number: row.try_get::<i64, _>("number").map_err(storage)? as u32,
        payload,
        locked: row.try_get::<i64, _>("locked").map_err(storage)? != 0,
        locked_at: locked_at.as_deref().map(parse_ts).transpose()?,
        locked_by: locked_by.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(storage)?)?,
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<DealActivity, DealError> {
    let kind: String = row.try_get("kind").map_err(storage)?;
    let kind = ActivityKind::parse(&kind)
        .ok_or_else(|| DealError::Storage(format!("unknown activity kind {kind}")))?;
    let metadata: String = row.try_get("metadata").map_err(storage)?;
    let from_stage: Option<String> = row.try_get("from_stage").map_err(storage)?;
    let to_stage: Option<String> = row.try_get("to_stage").map_err(storage)?;
    Ok(DealActivity {
        id: parse_uuid(&row.try_get::<String, _>("id").map_err(storage)?)?,
        deal_id: parse_uuid(&row.try_get::<String, _>("deal_id").map_err(storage)?)?,
        seq: row.try_get::<i64, _>("seq").map_err(storage)? as u64,
        kind,
        actor_id: parse_uuid(&row.try_get::<String, _>("actor_id").map_err(storage)?)?,
        from_stage: from_stage.as_deref().map(parse_stage).transpose()?,
        to_stage: to_stage.as_deref().map(parse_stage).transpose()?,
        recorded_at: parse_ts(&row.try_get::<String, _>("recorded_at").map_err(storage)?)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| DealError::Storage(e.to_string()))?,
    })
}

fn handoff_from_row(row: &SqliteRow) -> Result<DispatchHandoff, DealError> {
    Ok(DispatchHandoff {
        id: parse_uuid(&row.try_get::<String, _>("id").map_err(storage)?)?,
        deal_id: parse_uuid(&row.try_get::<String, _>("deal_id").map_err(storage)?)?,
        version_id: parse_uuid(&row.try_get::<String, _>("version_id").map_err(storage)?)?,
        artifact: ArtifactRef {
            content_hash: row.try_get("content_hash").map_err(storage)?,
            uri: row.try_get("artifact_uri").map_err(storage)?,
        },
        created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(storage)?)?,
    })
}

/// Insert one activity inside `tx`, assigning the next per-deal seq.
async fn insert_activity(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    deal_id: Uuid,
    draft: &ActivityDraft,
) -> Result<(), DealError> {
    sqlx::query(
        r#"
        INSERT INTO deal_activities
            (id, deal_id, seq, kind, actor_id, from_stage, to_stage, recorded_at, metadata)
        VALUES
            (?1, ?2,
             (SELECT COALESCE(MAX(seq), 0) + 1 FROM deal_activities WHERE deal_id = ?2),
             ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(deal_id.to_string())
    .bind(draft.kind.as_str())
    .bind(draft.actor_id.to_string())
    .bind(draft.from_stage.map(DealStage::as_str))
    .bind(draft.to_stage.map(DealStage::as_str))
    .bind(Utc::now().to_rfc3339())
    .bind(draft.metadata.to_string())
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(())
}

#[async_trait]
impl DealStore for SqliteStore {
    async fn create_deal(&self, new: NewDeal) -> Result<(Deal, DealVersion), DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let now = Utc::now();
        let deal_id = Uuid::new_v4();
        let version_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO deals
                (id, company_id, contact_id, title, stage, active_version_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(deal_id.to_string())
        .bind(new.company_id.to_string())
        .bind(new.contact_id.to_string())
        .bind(&new.title)
        .bind(DealStage::Draft.as_str())
        .bind(version_id.to_string())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let payload =
            serde_json::to_string(&new.initial_payload).map_err(|e| DealError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO deal_versions (id, deal_id, number, payload, locked, created_at)
            VALUES (?1, ?2, 1, ?3, 0, ?4)
            "#,
        )
        .bind(version_id.to_string())
        .bind(deal_id.to_string())
        .bind(payload)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        let deal = self.get_deal(deal_id).await?;
        let version = self.get_version(version_id).await?;
        Ok((deal, version))
    }

    async fn get_deal(&self, deal_id: Uuid) -> Result<Deal, DealError> {
        let row = sqlx::query("SELECT * FROM deals WHERE id = ?1")
            .bind(deal_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        match row {
            Some(row) => deal_from_row(&row),
            None => Err(DealError::DealNotFound(deal_id)),
        }
    }

    async fn get_version(&self, version_id: Uuid) -> Result<DealVersion, DealError> {
        let row = sqlx::query("SELECT * FROM deal_versions WHERE id = ?1")
            .bind(version_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        match row {
            Some(row) => version_from_row(&row),
            None => Err(DealError::VersionNotFound(version_id)),
        }
    }

    async fn create_version(
        &self,
        deal_id: Uuid,
        payload: VersionPayload,
    ) -> Result<DealVersion, DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let exists = sqlx::query("SELECT id FROM deals WHERE id = ?1")
            .bind(deal_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        if exists.is_none() {
            return Err(DealError::DealNotFound(deal_id));
        }

        let version_id = Uuid::new_v4();
        let now = Utc::now();
        let payload_json =
            serde_json::to_string(&payload).map_err(|e| DealError::Storage(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO deal_versions (id, deal_id, number, payload, locked, created_at)
            VALUES (?1, ?2,
                    (SELECT COALESCE(MAX(number), 0) + 1 FROM deal_versions WHERE deal_id = ?2),
                    ?3, 0, ?4)
            "#,
        )
        .bind(version_id.to_string())
        .bind(deal_id.to_string())
        .bind(payload_json)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query("UPDATE deals SET active_version_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(version_id.to_string())
            .bind(now.to_rfc3339())
            .bind(deal_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        self.get_version(version_id).await
    }

    async fn update_version_payload(
        &self,
        version_id: Uuid,
        payload: VersionPayload,
        activity: ActivityDraft,
    ) -> Result<DealVersion, DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let row = sqlx::query("SELECT * FROM deal_versions WHERE id = ?1")
            .bind(version_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(DealError::VersionNotFound(version_id))?;
        let version = version_from_row(&row)?;
        if version.locked {
            return Err(DealError::VersionLocked { version_id });
        }

        let payload_json =
            serde_json::to_string(&payload).map_err(|e| DealError::Storage(e.to_string()))?;
        // locked = 0 guard again at write time: immutable-once-locked holds
        // even if a lock slipped in between the read and this statement.
        let result = sqlx::query(
            "UPDATE deal_versions SET payload = ?1 WHERE id = ?2 AND locked = 0",
        )
        .bind(payload_json)
        .bind(version_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(DealError::VersionLocked { version_id });
        }

        insert_activity(&mut tx, version.deal_id, &activity).await?;
        tx.commit().await.map_err(storage)?;
        self.get_version(version_id).await
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Deal, DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let row = sqlx::query("SELECT * FROM deals WHERE id = ?1")
            .bind(commit.deal_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(DealError::DealNotFound(commit.deal_id))?;
        let deal = deal_from_row(&row)?;
        if deal.stage != commit.expected_from {
            return Err(DealError::InvalidStateTransition {
                from: deal.stage,
                to: commit.to,
            });
        }

        sqlx::query("UPDATE deals SET stage = ?1, updated_at = ?2 WHERE id = ?3 AND stage = ?4")
            .bind(commit.to.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(commit.deal_id.to_string())
            .bind(commit.expected_from.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        insert_activity(&mut tx, commit.deal_id, &commit.activity).await?;
        tx.commit().await.map_err(storage)?;
        self.get_deal(commit.deal_id).await
    }

    async fn try_lock_version(
        &self,
        deal_id: Uuid,
        version_id: Uuid,
        actor_id: Uuid,
    ) -> Result<LockOutcome, DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let row = sqlx::query("SELECT * FROM deal_versions WHERE id = ?1")
            .bind(version_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(DealError::VersionNotFound(version_id))?;
        let version = version_from_row(&row)?;
        if version.deal_id != deal_id {
            return Err(DealError::VersionNotFound(version_id));
        }

        // The CAS: only an unlocked row can flip to locked.
        let result = sqlx::query(
            r#"
            UPDATE deal_versions
            SET locked = 1, locked_at = ?1, locked_by = ?2
            WHERE id = ?3 AND locked = 0
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(actor_id.to_string())
        .bind(version_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            let handoff = sqlx::query("SELECT * FROM dispatch_handoffs WHERE version_id = ?1")
                .bind(version_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
            tx.commit().await.map_err(storage)?;
            let existing_handoff = handoff.map(|row| handoff_from_row(&row)).transpose()?;
            return Ok(LockOutcome::AlreadyLocked { existing_handoff });
        }

        tx.commit().await.map_err(storage)?;
        let locked = self.get_version(version_id).await?;
        Ok(LockOutcome::Acquired(locked))
    }

    async fn release_version_lock(&self, version_id: Uuid) -> Result<(), DealError> {
        let result = sqlx::query(
            "UPDATE deal_versions SET locked = 0, locked_at = NULL, locked_by = NULL WHERE id = ?1",
        )
        .bind(version_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(DealError::VersionNotFound(version_id));
        }
        Ok(())
    }

    async fn commit_approval(
        &self,
        commit: ApprovalCommit,
    ) -> Result<(Deal, DispatchHandoff), DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = sqlx::query("SELECT * FROM deal_versions WHERE id = ?1")
            .bind(commit.version_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(DealError::VersionNotFound(commit.version_id))?;
        let version = version_from_row(&row)?;
        if !version.locked {
            return Err(DealError::Unexpected(
                "approval commit without a held version lock".to_string(),
            ));
        }

        let row = sqlx::query("SELECT * FROM deals WHERE id = ?1")
            .bind(commit.deal_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(DealError::DealNotFound(commit.deal_id))?;
        let deal = deal_from_row(&row)?;
        if deal.stage != DealStage::PendingApproval {
            return Err(DealError::Unexpected(format!(
                "approval commit found stage {} instead of PENDING_APPROVAL",
                deal.stage
            )));
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO dispatch_handoffs
                (id, deal_id, version_id, content_hash, artifact_uri, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(commit.handoff_id.to_string())
        .bind(commit.deal_id.to_string())
        .bind(commit.version_id.to_string())
        .bind(&commit.artifact.content_hash)
        .bind(&commit.artifact.uri)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query("UPDATE deals SET stage = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(DealStage::Dispatched.as_str())
            .bind(now.to_rfc3339())
            .bind(commit.deal_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        for draft in &commit.activities {
            insert_activity(&mut tx, commit.deal_id, draft).await?;
        }
        tx.commit().await.map_err(storage)?;

        let deal = self.get_deal(commit.deal_id).await?;
        let row = sqlx::query("SELECT * FROM dispatch_handoffs WHERE id = ?1")
            .bind(commit.handoff_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok((deal, handoff_from_row(&row)?))
    }

    async fn append_activity(
        &self,
        deal_id: Uuid,
        draft: ActivityDraft,
    ) -> Result<DealActivity, DealError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let exists = sqlx::query("SELECT id FROM deals WHERE id = ?1")
            .bind(deal_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        if exists.is_none() {
            return Err(DealError::DealNotFound(deal_id));
        }
        insert_activity(&mut tx, deal_id, &draft).await?;
        tx.commit().await.map_err(storage)?;

        let row = sqlx::query(
            "SELECT * FROM deal_activities WHERE deal_id = ?1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(deal_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        activity_from_row(&row)
    }

    async fn list_activity(&self, deal_id: Uuid) -> Result<Vec<DealActivity>, DealError> {
        let rows = sqlx::query("SELECT * FROM deal_activities WHERE deal_id = ?1 ORDER BY seq ASC")
            .bind(deal_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(activity_from_row).collect()
    }
}
