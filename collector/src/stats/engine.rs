use async_trait::async_trait;

use super::compacter::Compacter;
use super::dispatcher::{Job, JobExecutor};
use super::statistic::{StatPreset, StatValue, ValueType};
use crate::database::LedgerStore;
use crate::error::Result;

/// Runs preset aggregates bucket by bucket against the store.
#[derive(Clone)]
pub struct StatEngine {
    store: LedgerStore,
}

impl StatEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// One value per bucket of `compacter`. A bucket without rows, or whose
    /// query or decode fails, is `None`; the other buckets are unaffected.
    pub async fn get_values(
        &self,
        coin: &str,
        preset: &StatPreset,
        compacter: &Compacter,
    ) -> Vec<Option<StatValue>> {
        let sql = preset.query(compacter.basis());
        let mut values = Vec::with_capacity(compacter.num());

        for (from, to) in compacter.buckets() {
            let value = match self.fetch_value(&sql, coin, from, to, preset.value_type).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(
                        "{} {}({}) bucket ({}, {}] failed: {}",
                        coin,
                        preset.method.as_str(),
                        preset.property,
                        from,
                        to,
                        e
                    );
                    None
                }
            };
            values.push(value);
        }

        values
    }

    async fn fetch_value(
        &self,
        sql: &str,
        coin: &str,
        from: i64,
        to: i64,
        value_type: ValueType,
    ) -> Result<Option<StatValue>> {
        let value = if value_type.is_float() {
            let row: Option<Option<f64>> = sqlx::query_scalar(sql)
                .bind(coin)
                .bind(from)
                .bind(to)
                .fetch_optional(self.store.pool())
                .await?;
            row.flatten().and_then(|v| value_type.from_f64(v))
        } else {
            let row: Option<Option<i64>> = sqlx::query_scalar(sql)
                .bind(coin)
                .bind(from)
                .bind(to)
                .fetch_optional(self.store.pool())
                .await?;
            row.flatten().and_then(|v| value_type.from_i64(v))
        };
        Ok(value)
    }
}

#[async_trait]
impl JobExecutor for StatEngine {
    async fn execute(&self, job: &Job) -> Vec<Option<StatValue>> {
        self.get_values(&job.coin, &job.preset, &job.compacter()).await
    }
}
