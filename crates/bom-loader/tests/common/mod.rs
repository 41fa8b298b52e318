//! Common test utilities for loader integration tests using testcontainers
//!
//! - PostgreSQL container with the canonical schema migrated
//! - Extract directories written to a temporary folder

#![allow(dead_code)]

use anyhow::{Context, Result};
use bom_loader::config::PipelineConfig;
use bom_loader::dataset::Dataset;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bom_loader=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the canonical schema applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of ledger entries, zero when the ledger does not exist yet
    pub async fn ledger_count(&self) -> Result<i64> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = 'bom' AND table_name = 'data_load_log')",
        )
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Ok(0);
        }
        self.count("bom.data_load_log").await
    }
}

// ============================================================================
// Extract fixtures
// ============================================================================

pub const YEARS: &str = "year\n1664\n1665\n";

pub const WEEKS: &str = "\
year,week_number,start_day,end_day,start_month,end_month,unique_identifier,week_id,year_range,joinid,split_year
1665,36,29,5,August,September,Laxton,1665-36,1665-1666,1665-36,1665
1665,37,5,12,September,September,Laxton,1665-37,1665-1666,1665-37,1665
";

pub const PARISHES: &str = "\
parish_name,canonical_name,parish_id
St Bride,St Bride Fleet Street,1
Allhallows Barking,Allhallows Barking,2
";

pub const CHRISTENINGS: &str = "\
year,week,unique_identifier,start_day,start_month,end_day,end_month,parish_name,count,missing,illegible,source,bill_type,joinid,start_year,end_year,count_type
1665,36,Laxton,29,August,5,September,St Bride,4,f,f,Laxton,Weekly,1665-36,1665,1665,Christened
1665,37,Laxton,5,September,12,September,St Bride,6,f,f,Laxton,Weekly,1665-37,1665,1665,Christened
";

pub const CAUSES_OF_DEATH: &str = "\
death,count,year,joinid,descriptive_text,source_name
Plague,5,1665,1665-36,,Laxton
Plague,12,1665,1665-36,recount,Laxton
Fever,3,1665,1665-36,,Laxton
Fever,2,1665,1799-99,orphan week,Laxton
";

pub const BILLS: &str = "\
unique_identifier,parish_name,count_type,count,missing,illegible,source,bill_type,start_year,end_year,joinid,parish_id,year,split_year
Laxton,St Bride,Buried,40,f,f,Laxton,Weekly,1665,1665,1665-36,1,1665,1665
Laxton,St Bride,Plague,32,f,t,Laxton,Weekly,1665,1665,1665-36,1,1665,1665
Laxton,Allhallows Barking,Buried,11,t,f,Laxton,Weekly,1665,1665,1665-37,2,1665,1665
Laxton,Nowhere,Buried,9,f,f,Laxton,Weekly,1665,1665,1665-37,99,1665,1665
";

/// A directory of extracts for one run
pub struct Extracts {
    dir: TempDir,
}

impl Extracts {
    /// All six extracts with consistent parents
    pub fn complete() -> Result<Self> {
        Self::empty()?
            .with(Dataset::Year, YEARS)?
            .with(Dataset::Week, WEEKS)?
            .with(Dataset::Parishes, PARISHES)?
            .with(Dataset::Christenings, CHRISTENINGS)?
            .with(Dataset::CausesOfDeath, CAUSES_OF_DEATH)?
            .with(Dataset::Bills, BILLS)
    }

    pub fn empty() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Write or replace the extract of `dataset`
    pub fn with(self, dataset: Dataset, contents: &str) -> Result<Self> {
        std::fs::write(self.dir.path().join(dataset.descriptor().file_name), contents)?;
        Ok(self)
    }

    pub fn without(self, dataset: Dataset) -> Result<Self> {
        std::fs::remove_file(self.dir.path().join(dataset.descriptor().file_name))?;
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::new(self.dir.path())
    }
}
