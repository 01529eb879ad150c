use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use std::time::Duration;

use crate::db::ConnectionPool;
use crate::model::employee::Employee;

/// Employee number / ID card => employee row id.
#[derive(Clone)]
pub struct EmployeeCache {
    inner: Cache<String, i64>,
}

impl Default for EmployeeCache {
    fn default() -> Self {
        Self::new(100_000, Duration::from_secs(86400))
    }
}

fn key(identifier: &str) -> Option<String> {
    let trimmed = identifier.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl EmployeeCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn lookup(&self, identifier: &str) -> Option<i64> {
        self.inner.get(&key(identifier)?).await
    }

    pub async fn remember(&self, employee: &Employee) {
        for identifier in [&employee.employee_number, &employee.id_card].into_iter().flatten() {
            if let Some(k) = key(identifier) {
                self.inner.insert(k, employee.id).await;
            }
        }
    }

    pub async fn forget(&self, employee: &Employee) {
        for identifier in [&employee.employee_number, &employee.id_card].into_iter().flatten() {
            if let Some(k) = key(identifier) {
                self.inner.invalidate(&k).await;
            }
        }
    }

    /// Drops every entry, e.g. after the database file was swapped.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    async fn batch_remember(&self, entries: &[(String, i64)]) {
        let futures: Vec<_> = entries
            .iter()
            .map(|(k, id)| self.inner.insert(k.clone(), *id))
            .collect();

        futures::future::join_all(futures).await;
    }

    /// Loads every employee identifier into the cache in batches.
    pub async fn warmup(&self, pool: &ConnectionPool, batch_size: usize) -> Result<usize> {
        let mut conn = pool.acquire().await?;
        let outcome = self.load_all(&mut conn, batch_size).await;
        pool.release(conn).await;
        let total_count = outcome?;

        log::info!("Employee cache warmup complete: {} identifiers", total_count);

        Ok(total_count)
    }

    async fn load_all(&self, conn: &mut sqlx::SqliteConnection, batch_size: usize) -> Result<usize> {
        let mut stream = sqlx::query_as::<_, (i64, Option<String>, Option<String>)>(
            "SELECT id, employee_number, id_card FROM employees ORDER BY id",
        )
        .fetch(&mut *conn);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total_count = 0usize;

        while let Some(row) = stream.next().await {
            let (id, number, card) = row?;
            for k in [number, card].into_iter().flatten().filter_map(|i| key(&i)) {
                batch.push((k, id));
                total_count += 1;
            }

            if batch.len() >= batch_size {
                self.batch_remember(&batch).await;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.batch_remember(&batch).await;
        }

        Ok(total_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::model::employee::EmployeeFields;

    #[tokio::test]
    async fn warmup_loads_both_identifiers() {
        let (_dir, pool) = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = Employee::insert(
            &mut conn,
            &EmployeeFields {
                name: "Wang Fang".into(),
                employee_number: Some("E100".into()),
                id_card: Some("110105199001011234".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;

        let cache = EmployeeCache::default();
        assert_eq!(cache.warmup(&pool, 1).await.unwrap(), 2);
        assert_eq!(cache.lookup("E100").await, Some(id));
        assert_eq!(cache.lookup(" 110105199001011234 ").await, Some(id));
        assert_eq!(cache.lookup("E999").await, None);
    }
}
