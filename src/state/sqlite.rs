//! SQLite persistence for sessions, knowledge entries, and the learning
//! queue.
//!
//! One pool backs all three stores so reviewer transitions and their
//! knowledge writes can share a transaction. Migrations are idempotent
//! (`IF NOT EXISTS`) and run at construction. Timestamps are RFC 3339
//! text; terms use `COLLATE NOCASE` so exact-term matching is
//! case-insensitive at the schema level, in one place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::governor::SessionBudgetState;
use crate::traits::{KnowledgeStore, LearningStore, SessionStore};
use crate::types::{
    CustomerId, KnowledgeEntry, KnowledgeScope, LearningItem, LearningStatus, ScopeHint,
    StatusFilter,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a file-backed store in WAL mode.
    pub async fn open(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Self::new(pool).await
    }

    /// Wrap an existing pool and run migrations.
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assistant_sessions (
                session_key TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                cost_used_usd REAL NOT NULL DEFAULT 0,
                turn_count INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_entries (
                id TEXT PRIMARY KEY,
                term TEXT NOT NULL COLLATE NOCASE,
                definition TEXT NOT NULL,
                category TEXT NOT NULL,
                scope TEXT NOT NULL,
                customer_id INTEGER,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One definition per term per scope.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_knowledge_term_scope
             ON knowledge_entries(term, scope, IFNULL(customer_id, -1))",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS learning_queue (
                id TEXT PRIMARY KEY,
                term TEXT NOT NULL COLLATE NOCASE,
                original_query TEXT NOT NULL,
                user_explanation TEXT,
                ai_interpretation TEXT NOT NULL,
                suggested_scope TEXT NOT NULL,
                suggested_category TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                customer_id INTEGER,
                conflicts_with_global INTEGER NOT NULL DEFAULT 0,
                conflicts_with_customer INTEGER NOT NULL DEFAULT 0,
                similar_existing_terms TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending',
                reviewed_by TEXT,
                rejection_reason TEXT,
                created_at TEXT NOT NULL,
                resolved_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_learning_status
             ON learning_queue(status, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_learning_term ON learning_queue(term)")
            .execute(&self.pool)
            .await?;

        info!("Governance store migration complete");
        Ok(())
    }

    fn row_to_entry(row: &SqliteRow) -> anyhow::Result<KnowledgeEntry> {
        let scope_str: String = row.get("scope");
        let customer_id: Option<CustomerId> = row.get("customer_id");
        let scope = match scope_str.as_str() {
            "global" => KnowledgeScope::Global,
            "customer" => KnowledgeScope::Customer(
                customer_id.ok_or_else(|| anyhow::anyhow!("customer entry missing customer_id"))?,
            ),
            other => anyhow::bail!("unknown knowledge scope: {}", other),
        };
        let created_at_str: String = row.get("created_at");
        Ok(KnowledgeEntry {
            id: row.get("id"),
            term: row.get("term"),
            definition: row.get("definition"),
            category: row.get("category"),
            scope,
            created_by: row.get("created_by"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)?.with_timezone(&Utc),
        })
    }

    fn row_to_item(row: &SqliteRow) -> anyhow::Result<LearningItem> {
        let status_str: String = row.get("status");
        let status = LearningStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown learning status: {}", status_str))?;
        let scope_str: String = row.get("suggested_scope");
        let suggested_scope = ScopeHint::parse(&scope_str)
            .ok_or_else(|| anyhow::anyhow!("unknown scope hint: {}", scope_str))?;
        let similar_json: String = row.get("similar_existing_terms");
        let created_at_str: String = row.get("created_at");
        let resolved_at_str: Option<String> = row.get("resolved_at");
        let resolved_at = match resolved_at_str {
            Some(s) => Some(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc)),
            None => None,
        };

        Ok(LearningItem {
            id: row.get("id"),
            term: row.get("term"),
            original_query: row.get("original_query"),
            user_explanation: row.get("user_explanation"),
            ai_interpretation: row.get("ai_interpretation"),
            suggested_scope,
            suggested_category: row.get("suggested_category"),
            confidence_score: row.get("confidence_score"),
            customer_id: row.get("customer_id"),
            conflicts_with_global: row.get::<i64, _>("conflicts_with_global") != 0,
            conflicts_with_customer: row.get::<i64, _>("conflicts_with_customer") != 0,
            similar_existing_terms: serde_json::from_str(&similar_json)?,
            status,
            reviewed_by: row.get("reviewed_by"),
            rejection_reason: row.get("rejection_reason"),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)?.with_timezone(&Utc),
            resolved_at,
        })
    }
}

// A write over an existing (term, scope, customer) row replaces the
// definition in place: a reviewer approving a conflicted term is resolving
// the conflict, not creating a duplicate.
async fn upsert_entry(
    executor: &mut sqlx::SqliteConnection,
    entry: &KnowledgeEntry,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO knowledge_entries (
            id, term, definition, category, scope, customer_id, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(term, scope, IFNULL(customer_id, -1)) DO UPDATE SET
            definition = excluded.definition,
            category = excluded.category,
            created_by = excluded.created_by,
            created_at = excluded.created_at
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.term)
    .bind(&entry.definition)
    .bind(&entry.category)
    .bind(entry.scope.as_str())
    .bind(entry.scope.customer_id())
    .bind(&entry.created_by)
    .bind(entry.created_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self, session_key: &str) -> anyhow::Result<Option<SessionBudgetState>> {
        let row = sqlx::query(
            "SELECT session_id, tokens_used, cost_used_usd, turn_count, started_at, last_activity_at
             FROM assistant_sessions WHERE session_key = ?",
        )
        .bind(session_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let started_at_str: String = row.get("started_at");
        let last_activity_str: String = row.get("last_activity_at");
        Ok(Some(SessionBudgetState {
            session_id: row.get("session_id"),
            tokens_used: row.get::<i64, _>("tokens_used") as u64,
            cost_used_usd: row.get("cost_used_usd"),
            turn_count: row.get::<i64, _>("turn_count") as u32,
            started_at: DateTime::parse_from_rfc3339(&started_at_str)?.with_timezone(&Utc),
            last_activity_at: DateTime::parse_from_rfc3339(&last_activity_str)?
                .with_timezone(&Utc),
        }))
    }

    async fn save(&self, session_key: &str, state: &SessionBudgetState) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assistant_sessions (
                session_key, session_id, tokens_used, cost_used_usd, turn_count,
                started_at, last_activity_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_key) DO UPDATE SET
                session_id = excluded.session_id,
                tokens_used = excluded.tokens_used,
                cost_used_usd = excluded.cost_used_usd,
                turn_count = excluded.turn_count,
                started_at = excluded.started_at,
                last_activity_at = excluded.last_activity_at
            "#,
        )
        .bind(session_key)
        .bind(&state.session_id)
        .bind(state.tokens_used as i64)
        .bind(state.cost_used_usd)
        .bind(i64::from(state.turn_count))
        .bind(state.started_at.to_rfc3339())
        .bind(state.last_activity_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn lookup(
        &self,
        term: &str,
        customer_id: Option<CustomerId>,
    ) -> anyhow::Result<Option<KnowledgeEntry>> {
        // Customer scope wins over global for that customer; the ORDER BY
        // is the precedence rule.
        let row = match customer_id {
            Some(customer_id) => {
                sqlx::query(
                    r#"
                    SELECT id, term, definition, category, scope, customer_id, created_by, created_at
                    FROM knowledge_entries
                    WHERE term = ?
                      AND (scope = 'global' OR (scope = 'customer' AND customer_id = ?))
                    ORDER BY CASE scope WHEN 'customer' THEN 0 ELSE 1 END
                    LIMIT 1
                    "#,
                )
                .bind(term)
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, term, definition, category, scope, customer_id, created_by, created_at
                    FROM knowledge_entries
                    WHERE term = ? AND scope = 'global'
                    LIMIT 1
                    "#,
                )
                .bind(term)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn lookup_scoped(
        &self,
        term: &str,
        scope: KnowledgeScope,
    ) -> anyhow::Result<Option<KnowledgeEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, term, definition, category, scope, customer_id, created_by, created_at
            FROM knowledge_entries
            WHERE term = ? AND scope = ? AND IFNULL(customer_id, -1) = IFNULL(?, -1)
            LIMIT 1
            "#,
        )
        .bind(term)
        .bind(scope.as_str())
        .bind(scope.customer_id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn write(&self, entry: &KnowledgeEntry) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_entry(&mut *conn, entry).await
    }

    async fn all_terms(&self) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT term FROM knowledge_entries")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("term")).collect())
    }
}

#[async_trait]
impl LearningStore for SqliteStore {
    async fn insert(&self, item: &LearningItem) -> anyhow::Result<()> {
        let similar_json = serde_json::to_string(&item.similar_existing_terms)?;
        sqlx::query(
            r#"
            INSERT INTO learning_queue (
                id, term, original_query, user_explanation, ai_interpretation,
                suggested_scope, suggested_category, confidence_score, customer_id,
                conflicts_with_global, conflicts_with_customer, similar_existing_terms,
                status, reviewed_by, rejection_reason, created_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.term)
        .bind(&item.original_query)
        .bind(&item.user_explanation)
        .bind(&item.ai_interpretation)
        .bind(item.suggested_scope.as_str())
        .bind(&item.suggested_category)
        .bind(item.confidence_score)
        .bind(item.customer_id)
        .bind(i64::from(item.conflicts_with_global))
        .bind(i64::from(item.conflicts_with_customer))
        .bind(&similar_json)
        .bind(item.status.as_str())
        .bind(&item.reviewed_by)
        .bind(&item.rejection_reason)
        .bind(item.created_at.to_rfc3339())
        .bind(item.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, item_id: &str) -> anyhow::Result<Option<LearningItem>> {
        let row = sqlx::query("SELECT * FROM learning_queue WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn list(&self, filter: StatusFilter) -> anyhow::Result<Vec<LearningItem>> {
        let rows = match filter {
            StatusFilter::All => {
                sqlx::query("SELECT * FROM learning_queue ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
            StatusFilter::Only(status) => {
                sqlx::query(
                    "SELECT * FROM learning_queue WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    async fn resolve_pending(
        &self,
        item_id: &str,
        to: LearningStatus,
        reviewer: &str,
        rejection_reason: Option<&str>,
        entry: Option<&KnowledgeEntry>,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        // The status guard makes concurrent reviewer actions race-safe: the
        // loser matches zero rows and nothing is written.
        let result = sqlx::query(
            r#"
            UPDATE learning_queue
            SET status = ?, reviewed_by = ?, rejection_reason = ?, resolved_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(to.as_str())
        .bind(reviewer)
        .bind(rejection_reason)
        .bind(Utc::now().to_rfc3339())
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(entry) = entry {
            upsert_entry(&mut *tx, entry).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn merge_customer_approvals(
        &self,
        term: &str,
        reviewer: &str,
        entry: &KnowledgeEntry,
    ) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE learning_queue
            SET status = 'merged', reviewed_by = ?, resolved_at = ?
            WHERE term = ? AND status = 'approved_customer'
            "#,
        )
        .bind(reviewer)
        .bind(Utc::now().to_rfc3339())
        .bind(term)
        .execute(&mut *tx)
        .await?;

        let merged = result.rows_affected();
        if merged == 0 {
            tx.rollback().await?;
            return Ok(0);
        }

        // The superseded customer definitions collapse into the one global
        // entry; queue items stay (as `merged`) for audit.
        sqlx::query("DELETE FROM knowledge_entries WHERE term = ? AND scope = 'customer'")
            .bind(term)
            .execute(&mut *tx)
            .await?;

        upsert_entry(&mut *tx, entry).await?;

        tx.commit().await?;
        Ok(merged)
    }

    async fn rejection_count(&self, term: &str) -> anyhow::Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM learning_queue WHERE term = ? AND status = 'rejected'",
        )
        .bind(term)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}
