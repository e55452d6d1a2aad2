use std::{env, fs::File, path::Path};

use custodial_ledger::dlq::LogDLQ;
use custodial_ledger::domain::{Error, LedgerStore};
use custodial_ledger::engine::Engine;
use custodial_ledger::ingestion::CsvReader;
use custodial_ledger::report::CsvBalanceReport;
use custodial_ledger::store::InMemoryStore;
use custodial_ledger::{Ledger, LedgerConfig, telemetry};
use tracing::info;

#[tokio::main] // using Tokio runtime for async
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    let config = LedgerConfig::from_env()?;

    let file_path = env::args()
        .nth(1)
        .ok_or_else(|| Error::Config("usage: custodial_ledger <commands.csv>".to_string()))?;
    let file = File::open(Path::new(&file_path))?;
    let ingestion = CsvReader::new(file)?;

    if let Some(url) = config.database_url.as_deref() {
        run_postgres(ingestion, url, &config).await?;
        return Ok(());
    }

    run(ingestion, InMemoryStore::new(config.lock_timeout), &config).await?;
    Ok(())
}

async fn run<S: LedgerStore>(
    ingestion: CsvReader<File>,
    store: S,
    config: &LedgerConfig,
) -> Result<(), Error> {
    let ledger = Ledger::new(store).with_max_fund_request(config.max_fund_request);

    // Initialize engine with injected components
    let mut engine = Engine::new(ingestion, ledger, CsvBalanceReport::stdout(), LogDLQ::default());
    engine.process().await?;
    engine.flush().await?;

    info!("run complete");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_postgres(
    ingestion: CsvReader<File>,
    url: &str,
    config: &LedgerConfig,
) -> Result<(), Error> {
    use custodial_ledger::store::PostgresStore;

    let store = PostgresStore::connect(url, config.max_connections, config.lock_timeout).await?;
    store.migrate().await?;
    let outcome = run(ingestion, store.clone(), config).await;
    store.close().await;
    outcome
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(
    _ingestion: CsvReader<File>,
    _url: &str,
    _config: &LedgerConfig,
) -> Result<(), Error> {
    Err(Error::Config(
        "DATABASE_URL is set but this build lacks the `postgres` feature".to_string(),
    ))
}
