use deadpool_postgres::Pool;
use std::env;

use movie_index_bot::config::create_pool;

pub mod broadcast_tests;
pub mod indexing_tests;
pub mod mock_bot;
pub mod premium_tests;
pub mod request_tests;
pub mod stats_tests;
pub mod test_utils;
pub mod user_tests;

/// test database configuration and setup
pub struct TestDatabase {
    pub pool: Pool,
    pub db_name: String,
    admin_url: String,
}

impl TestDatabase {
    /// creates a new test database next to the one TEST_DATABASE_URL points at
    pub async fn new(database_url: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // install default crypto provider if not already installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        // generate unique database name for this test
        let db_name = format!("test_db_{}", fastrand::u64(..));

        let admin_pool = create_pool(database_url)?;
        let admin_client = admin_pool.get().await?;
        admin_client
            .execute(&format!("CREATE DATABASE \"{}\"", db_name), &[])
            .await?;
        drop(admin_client);

        // connect to the new test database by replacing only the database name
        let test_url = {
            let mut url = url::Url::parse(database_url)?;
            url.set_path(&format!("/{}", db_name));
            url.to_string()
        };
        let pool = create_pool(&test_url)?;

        // test connection
        let _client = pool.get().await?;

        Ok(Self {
            pool,
            db_name,
            admin_url: database_url.to_string(),
        })
    }

    /// runs migrations on the test database
    pub async fn setup_schema(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        movie_index_bot::migrations::MigrationManager::run_migrations(&self.pool).await?;
        Ok(())
    }

    /// a migrated database, or None when TEST_DATABASE_URL is not set
    pub async fn create_fresh() -> Option<Self> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping database test");
            return None;
        };
        let db = Self::new(&database_url)
            .await
            .expect("Failed to create test database");
        db.setup_schema().await.expect("Failed to run migrations");
        Some(db)
    }

    /// drops the test database
    pub async fn cleanup(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pool.close();

        let admin_pool = create_pool(&self.admin_url)?;
        let admin_client = admin_pool.get().await?;

        // force disconnect all connections to the test database
        admin_client
            .execute(
                &format!(
                    "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}' AND pid <> pg_backend_pid()",
                    self.db_name
                ),
                &[],
            )
            .await?;

        admin_client
            .execute(&format!("DROP DATABASE IF EXISTS \"{}\"", self.db_name), &[])
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_setup() {
        let Some(db) = TestDatabase::create_fresh().await else {
            return;
        };

        let client = db.pool.get().await.expect("Failed to get database client");
        let tables = client
            .query(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'",
                &[],
            )
            .await
            .expect("Failed to check schema");

        let table_names: Vec<String> = tables.iter().map(|row| row.get(0)).collect();
        for table in [
            "users",
            "movies",
            "channels",
            "requests",
            "premium_users",
            "premium_features",
            "broadcasts",
            "scheduled_deletions",
        ] {
            assert!(
                table_names.contains(&table.to_string()),
                "missing table {}",
                table
            );
        }
        drop(client);

        db.cleanup().await.expect("Failed to cleanup test database");
    }
}
