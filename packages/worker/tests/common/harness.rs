//! Test harness backed by a local Postgres server.
//!
//! One Postgres server is shared across the whole test run; each test
//! gets its own freshly migrated database on it, so tests that scan whole
//! tables (dispatch, cleanup sweeps) cannot see each other's rows.

use std::net::TcpListener;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedTestInfra {
    admin_url: String,
    host: String,
    port: u16,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

/// Run a shell command, dropping to the `postgres` user when we are root,
/// because the Postgres binaries refuse to run as root.
fn run_as_postgres(cmd: &str) -> Result<()> {
    let output = if nix_is_root() {
        Command::new("su")
            .args(["-s", "/bin/sh", "postgres", "-c", cmd])
            .output()
    } else {
        Command::new("/bin/sh").args(["-c", cmd]).output()
    }
    .with_context(|| format!("Failed to spawn: {cmd}"))?;

    if !output.status.success() {
        return Err(anyhow!(
            "Command failed ({cmd}):\n{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

fn nix_is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc_geteuid() == 0 }
}

extern "C" {
    #[link_name = "geteuid"]
    fn libc_geteuid() -> u32;
}

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let host = "127.0.0.1".to_string();
        // Grab a free port; the tiny race between drop and server start is
        // acceptable for a test harness.
        let port = TcpListener::bind((host.as_str(), 0))
            .context("Failed to probe for a free port")?
            .local_addr()?
            .port();

        let data_dir = format!("/tmp/worker-test-pg-{}", Uuid::new_v4().simple());
        run_as_postgres(&format!(
            "/usr/local/bin/initdb -D {data_dir} -U postgres -A trust"
        ))
        .context("Failed to initialize Postgres data directory")?;
        run_as_postgres(&format!(
            "/usr/local/bin/pg_ctl -D {data_dir} -w -l {data_dir}/server.log \
             -o '-p {port} -k /tmp -c listen_addresses={host} -c max_connections=200' start"
        ))
        .context("Failed to start Postgres server")?;

        let admin_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        Ok(Self {
            admin_url,
            host,
            port,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

pub struct TestHarness {
    pub db_pool: PgPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {}
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_name = format!("test_{}", Uuid::new_v4().simple());
        let admin = PgPool::connect(&infra.admin_url)
            .await
            .context("Failed to connect to admin database")?;
        sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/{}",
            infra.host, infra.port, db_name
        );
        let db_pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to test database")?;
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { db_pool })
    }
}
