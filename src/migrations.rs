use deadpool_postgres::Pool;
use log::info;
use tokio_postgres::Transaction;

pub struct MigrationManager;

impl MigrationManager {
    pub async fn run_migrations(
        pool: &Pool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Running database migrations...");
        let mut client = pool.get().await?;

        // check if migrations table exists and create if not
        let needs_init = client
            .query_opt(
                "SELECT 1 FROM pg_tables WHERE schemaname = 'public' AND tablename = 'schema_migrations'",
                &[],
            )
            .await?
            .is_none();

        if needs_init {
            // first time setup - create everything in a single transaction
            let transaction = client.transaction().await?;
            Self::initial_setup(&transaction).await?;
            transaction.commit().await?;
            info!("Initial database setup completed");
        }

        // always check for newer versions, even right after initial setup
        let current_version = Self::get_current_version(&client).await?;
        if current_version < Self::latest_version() {
            let transaction = client.transaction().await?;
            Self::run_pending_migrations(&transaction, current_version).await?;
            transaction.commit().await?;
            info!(
                "Database migrated from version {} to {}",
                current_version,
                Self::latest_version()
            );
        } else {
            info!("Database schema is up to date");
        }

        Ok(())
    }

    async fn initial_setup(
        transaction: &Transaction<'_>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let migration_sql = r#"
            -- Migration tracking table
            CREATE TABLE schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            );

            -- Users table
            CREATE TABLE users (
                id SERIAL PRIMARY KEY,
                telegram_user_id BIGINT NOT NULL UNIQUE,
                username VARCHAR(255),
                first_name VARCHAR(255),
                last_name VARCHAR(255),
                role VARCHAR(16) NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin', 'banned')),
                terms_accepted BOOLEAN NOT NULL DEFAULT FALSE,
                terms_accepted_at TIMESTAMP WITH TIME ZONE,
                last_seen TIMESTAMP WITH TIME ZONE,
                download_count INTEGER NOT NULL DEFAULT 0,
                inline_search_count INTEGER NOT NULL DEFAULT 0,
                preferences JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            );

            CREATE TABLE search_history (
                id SERIAL PRIMARY KEY,
                telegram_user_id BIGINT NOT NULL,
                query TEXT NOT NULL,
                searched_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );

            CREATE TABLE download_history (
                id SERIAL PRIMARY KEY,
                telegram_user_id BIGINT NOT NULL,
                channel_id BIGINT,
                message_id INTEGER,
                bulk BOOLEAN NOT NULL DEFAULT FALSE,
                file_count INTEGER NOT NULL DEFAULT 1,
                downloaded_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );

            -- Monitored channels
            CREATE TABLE channels (
                id SERIAL PRIMARY KEY,
                channel_id BIGINT NOT NULL UNIQUE,
                channel_title VARCHAR(255),
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                added_by BIGINT,
                added_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );

            -- Indexed files
            CREATE TABLE movies (
                id SERIAL PRIMARY KEY,
                channel_id BIGINT NOT NULL,
                message_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                year INTEGER,
                quality VARCHAR(32),
                rip VARCHAR(255),
                source VARCHAR(255),
                extension VARCHAR(16),
                resolution VARCHAR(32),
                audio VARCHAR(255),
                audio_channels VARCHAR(32),
                video_codec VARCHAR(32),
                bit_depth VARCHAR(16),
                hdr_format VARCHAR(32),
                imdb VARCHAR(16),
                content_type VARCHAR(10) NOT NULL DEFAULT 'Movie' CHECK (content_type IN ('Movie', 'Series')),
                season INTEGER,
                episode INTEGER,
                file_name TEXT,
                file_size BIGINT,
                mime_type VARCHAR(255),
                channel_title VARCHAR(255),
                caption TEXT,
                indexed_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                UNIQUE (channel_id, message_id)
            );

            CREATE TABLE settings (
                key VARCHAR(64) PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            );

            CREATE TABLE indexing_stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                total_attempts BIGINT NOT NULL DEFAULT 0,
                successful_inserts BIGINT NOT NULL DEFAULT 0,
                duplicate_errors BIGINT NOT NULL DEFAULT 0,
                other_errors BIGINT NOT NULL DEFAULT 0,
                last_reset TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );
            INSERT INTO indexing_stats (id) VALUES (1);

            -- User requests
            CREATE TABLE requests (
                id SERIAL PRIMARY KEY,
                telegram_user_id BIGINT NOT NULL,
                username VARCHAR(255),
                title TEXT NOT NULL,
                year INTEGER,
                imdb_link TEXT,
                status VARCHAR(16) NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'completed')),
                request_date TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                completed_at TIMESTAMP WITH TIME ZONE,
                completed_by BIGINT
            );

            CREATE TABLE user_request_limits (
                telegram_user_id BIGINT PRIMARY KEY,
                last_request_date TIMESTAMP WITH TIME ZONE NOT NULL
            );

            -- Premium
            CREATE TABLE premium_users (
                id SERIAL PRIMARY KEY,
                telegram_user_id BIGINT NOT NULL UNIQUE,
                username VARCHAR(255),
                granted_by BIGINT,
                granted_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            );

            CREATE TABLE premium_features (
                id SERIAL PRIMARY KEY,
                feature_name VARCHAR(64) NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                premium_only BOOLEAN NOT NULL DEFAULT FALSE,
                created_by BIGINT,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            );

            -- Audit log
            CREATE TABLE action_logs (
                id SERIAL PRIMARY KEY,
                action VARCHAR(64) NOT NULL,
                by_user BIGINT,
                target BIGINT,
                extra JSONB,
                ts TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            );

            -- Create all indexes
            CREATE INDEX idx_users_role ON users(role);
            CREATE INDEX idx_users_last_seen ON users(last_seen);
            CREATE INDEX idx_search_history_user ON search_history(telegram_user_id, searched_at DESC);
            CREATE INDEX idx_download_history_user ON download_history(telegram_user_id);
            CREATE INDEX idx_movies_title_lower ON movies(LOWER(title));
            CREATE INDEX idx_movies_indexed_at ON movies(indexed_at DESC);
            CREATE INDEX idx_requests_status ON requests(status, request_date);
            CREATE INDEX idx_requests_user ON requests(telegram_user_id, status);
            CREATE INDEX idx_premium_users_expires ON premium_users(expires_at);
            CREATE INDEX idx_action_logs_ts ON action_logs(ts);

            -- Record initial migration
            INSERT INTO schema_migrations (version) VALUES (1);
        "#;

        transaction.batch_execute(migration_sql).await?;
        Ok(())
    }

    async fn get_current_version(
        client: &deadpool_postgres::Object,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        let row = client
            .query_one("SELECT MAX(version) FROM schema_migrations", &[])
            .await?;
        Ok(row.get::<_, Option<i32>>(0).unwrap_or(0))
    }

    pub fn latest_version() -> i32 {
        3 // increment this when adding new migrations
    }

    async fn run_pending_migrations(
        transaction: &Transaction<'_>,
        current_version: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for version in (current_version + 1)..=Self::latest_version() {
            match version {
                2 => {
                    // delivered files that must be removed from user chats later
                    let migration_sql = r#"
                        CREATE TABLE scheduled_deletions (
                            id SERIAL PRIMARY KEY,
                            chat_id BIGINT NOT NULL,
                            message_id INTEGER NOT NULL,
                            delete_at TIMESTAMP WITH TIME ZONE NOT NULL,
                            warn_at TIMESTAMP WITH TIME ZONE NOT NULL,
                            notified BOOLEAN NOT NULL DEFAULT FALSE,
                            created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
                        );

                        CREATE INDEX idx_scheduled_deletions_delete_at ON scheduled_deletions(delete_at);
                        CREATE INDEX idx_scheduled_deletions_warn ON scheduled_deletions(notified, warn_at);
                    "#;
                    transaction.batch_execute(migration_sql).await?;
                }
                3 => {
                    // broadcast audit records
                    let migration_sql = r#"
                        CREATE TABLE broadcasts (
                            id SERIAL PRIMARY KEY,
                            broadcast_id VARCHAR(32) NOT NULL UNIQUE,
                            admin_id BIGINT NOT NULL,
                            admin_username VARCHAR(255),
                            message_text TEXT NOT NULL,
                            total_users INTEGER NOT NULL,
                            sent_count INTEGER NOT NULL,
                            failed_count INTEGER NOT NULL,
                            error_breakdown JSONB NOT NULL DEFAULT '{}'::jsonb,
                            started_at TIMESTAMP WITH TIME ZONE NOT NULL,
                            completed_at TIMESTAMP WITH TIME ZONE NOT NULL,
                            duration_seconds DOUBLE PRECISION NOT NULL,
                            status VARCHAR(16) NOT NULL DEFAULT 'completed',
                            created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
                        );

                        CREATE INDEX idx_broadcasts_started ON broadcasts(started_at DESC);
                    "#;
                    transaction.batch_execute(migration_sql).await?;
                }
                _ => {}
            }
            transaction
                .execute(
                    "INSERT INTO schema_migrations (version) VALUES ($1)",
                    &[&version],
                )
                .await?;
        }
        Ok(())
    }
}
