//! Database schema

use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::{debug, info};

/// Initialize the database
pub async fn initialize_database(db_url: &str) -> Result<Pool<Sqlite>> {
    if !db_url.contains(":memory:") && !Sqlite::database_exists(db_url).await? {
        debug!("Creating database at: {}", db_url);
        Sqlite::create_database(db_url).await?;
    }

    // An in-memory database lives and dies with its single connection
    let options = if db_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(10)
    };
    let pool = options.connect(db_url).await?;

    info!("Running database migrations");
    create_tables(&pool).await?;

    Ok(pool)
}

const TABLES: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS downloads (
        id TEXT PRIMARY KEY,
        user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        url TEXT NOT NULL,
        title TEXT,
        description TEXT,
        duration INTEGER,
        thumbnail TEXT,
        quality TEXT NOT NULL DEFAULT 'best',
        status TEXT NOT NULL DEFAULT 'pending',
        progress REAL NOT NULL DEFAULT 0,
        file_path TEXT,
        file_size INTEGER,
        format TEXT,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        downloads_count INTEGER NOT NULL DEFAULT 0,
        last_accessed TEXT,
        uploaded_to_drive BOOLEAN NOT NULL DEFAULT FALSE,
        drive_file_id TEXT,
        storage_type TEXT NOT NULL DEFAULT 'temporary'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        full_name TEXT,
        hashed_password TEXT NOT NULL,
        salt TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_login TEXT,
        login_attempts INTEGER NOT NULL DEFAULT 0,
        locked_until TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        preferences TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS temporary_files (
        id TEXT PRIMARY KEY,
        download_id TEXT NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        token TEXT NOT NULL UNIQUE,
        expiration_time TEXT NOT NULL,
        access_count INTEGER NOT NULL DEFAULT 0,
        max_accesses INTEGER,
        temporary_url TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        custom_filename TEXT,
        created_at TEXT NOT NULL,
        last_accessed TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS drive_configs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        credentials TEXT NOT NULL,
        folder_id TEXT,
        custom_key TEXT,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        last_sync TEXT,
        error_message TEXT,
        quota_used INTEGER NOT NULL DEFAULT 0,
        quota_limit INTEGER,
        is_default BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS download_logs (
        id TEXT PRIMARY KEY,
        download_id TEXT REFERENCES downloads(id) ON DELETE SET NULL,
        user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        action TEXT NOT NULL,
        video_url TEXT NOT NULL,
        video_title TEXT NOT NULL,
        video_format TEXT,
        video_quality TEXT,
        start_time TEXT,
        end_time TEXT,
        download_duration REAL,
        download_speed REAL,
        file_size_downloaded INTEGER,
        progress_percentage REAL,
        status TEXT NOT NULL,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        ip_address TEXT,
        user_agent TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

const INDEXES: [&str; 10] = [
    "CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status)",
    "CREATE INDEX IF NOT EXISTS idx_downloads_url ON downloads(url)",
    "CREATE INDEX IF NOT EXISTS idx_downloads_created ON downloads(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_temp_files_token ON temporary_files(token)",
    "CREATE INDEX IF NOT EXISTS idx_temp_files_download ON temporary_files(download_id)",
    "CREATE INDEX IF NOT EXISTS idx_temp_files_expiration ON temporary_files(expiration_time)",
    "CREATE INDEX IF NOT EXISTS idx_logs_download ON download_logs(download_id)",
    "CREATE INDEX IF NOT EXISTS idx_logs_created ON download_logs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
    "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
];

/// Create database tables
async fn create_tables(pool: &Pool<Sqlite>) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    debug!("Database tables created successfully");
    Ok(())
}
