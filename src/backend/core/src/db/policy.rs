//! Policy fact persistence in PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::error::{DepotError, Result};
use crate::rbac::adapter::PolicyAdapter;
use crate::rbac::models::{FactChange, FactSet, FactSnapshot, GrantFact, GroupingFact};

/// Stores grant and grouping facts in `authz_grants` / `authz_groupings`.
///
/// Incremental changes are written row by row inside one transaction, so a
/// batch either lands completely or not at all.
#[derive(Debug, Clone)]
pub struct PgPolicyAdapter {
    pool: PgPool,
}

impl PgPolicyAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    subject: String,
    domain: String,
    object: String,
    action: String,
}

#[derive(Debug, sqlx::FromRow)]
struct GroupingRow {
    user_id: String,
    role: String,
    domain: String,
}

#[async_trait]
impl PolicyAdapter for PgPolicyAdapter {
    async fn load(&self) -> Result<FactSnapshot> {
        let grants = sqlx::query_as::<_, GrantRow>(
            "SELECT subject, domain, object, action FROM authz_grants",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DepotError::policy_load(e.to_string()).with_source(e))?;

        let groupings =
            sqlx::query_as::<_, GroupingRow>("SELECT user_id, role, domain FROM authz_groupings")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| DepotError::policy_load(e.to_string()).with_source(e))?;

        Ok(FactSnapshot {
            grants: grants
                .into_iter()
                .map(|r| GrantFact::new(r.subject, r.domain, r.object, r.action))
                .collect(),
            groupings: groupings
                .into_iter()
                .map(|r| GroupingFact::new(r.user_id, r.role, r.domain))
                .collect(),
        })
    }

    async fn save(&self, snapshot: &FactSnapshot) -> Result<()> {
        let write = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM authz_grants").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM authz_groupings").execute(&mut *tx).await?;
            for grant in &snapshot.grants {
                insert_grant(&mut tx, grant).await?;
            }
            for grouping in &snapshot.groupings {
                insert_grouping(&mut tx, grouping).await?;
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(())
        };
        write
            .await
            .map_err(|e| DepotError::policy_write(e.to_string()).with_source(e))?;

        debug!(
            grants = snapshot.grants.len(),
            groupings = snapshot.groupings.len(),
            "Policy snapshot written to database"
        );
        Ok(())
    }

    async fn apply(&self, changes: &[FactChange], _facts: &FactSet) -> Result<()> {
        let write = async {
            let mut tx = self.pool.begin().await?;
            for change in changes {
                match change {
                    FactChange::AddGrant(g) => insert_grant(&mut tx, g).await?,
                    FactChange::RemoveGrant(g) => {
                        sqlx::query(
                            "DELETE FROM authz_grants \
                             WHERE subject = $1 AND domain = $2 AND object = $3 AND action = $4",
                        )
                        .bind(&g.subject)
                        .bind(&g.domain)
                        .bind(&g.object)
                        .bind(&g.action)
                        .execute(&mut *tx)
                        .await?;
                    }
                    FactChange::AddGrouping(g) => insert_grouping(&mut tx, g).await?,
                    FactChange::RemoveGrouping(g) => {
                        sqlx::query(
                            "DELETE FROM authz_groupings \
                             WHERE user_id = $1 AND role = $2 AND domain = $3",
                        )
                        .bind(&g.user)
                        .bind(&g.role)
                        .bind(&g.domain)
                        .execute(&mut *tx)
                        .await?;
                    }
                }
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(())
        };
        write
            .await
            .map_err(|e| DepotError::policy_write(e.to_string()).with_source(e))
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

async fn insert_grant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    grant: &GrantFact,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO authz_grants (subject, domain, object, action) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT DO NOTHING",
    )
    .bind(&grant.subject)
    .bind(&grant.domain)
    .bind(&grant.object)
    .bind(&grant.action)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_grouping(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    grouping: &GroupingFact,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO authz_groupings (user_id, role, domain) \
         VALUES ($1, $2, $3) \
         ON CONFLICT DO NOTHING",
    )
    .bind(&grouping.user)
    .bind(&grouping.role)
    .bind(&grouping.domain)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
