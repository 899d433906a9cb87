use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use paylock::application::engine::{InvoiceSummary, PaymentEngine};
use paylock::config::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_ZK_PORT, Settings, StoreBackend, postgres_url,
    zookeeper_endpoint,
};
use paylock::domain::invoice::{Amount, TransactionId};
use paylock::domain::ledger::{OperationKind, OperationStatus};
use paylock::domain::lock::LockBackend;
use paylock::interfaces::csv::ledger_writer::LedgerWriter;
use paylock::interfaces::csv::operation_reader::OperationReader;
use paylock::lock::queue::DEFAULT_ROOT_PREFIX;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Ledger store backend.
    #[arg(long, value_enum, env = "PAYLOCK_STORE", default_value_t = StoreBackend::Memory, global = true)]
    store: StoreBackend,

    /// Lock coordinator backend.
    #[arg(long, value_enum, env = "PAYLOCK_LOCK", default_value_t = LockBackend::Advisory, global = true)]
    lock: LockBackend,

    #[command(flatten)]
    postgres: PostgresArgs,

    #[command(flatten)]
    zookeeper: ZookeeperArgs,

    /// Root node prefix of the queue lock.
    #[arg(long, default_value = DEFAULT_ROOT_PREFIX, global = true)]
    root_prefix: String,

    /// Poll interval of the session advisory lock, in milliseconds.
    #[arg(long, default_value_t = 2000, global = true)]
    retry_interval_ms: u64,

    /// Give up waiting for a lock after this many milliseconds.
    #[arg(long, global = true)]
    lock_timeout_ms: Option<u64>,

    /// Simulated provider latency, in milliseconds.
    #[arg(long, default_value_t = 0, global = true)]
    psp_latency_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct PostgresArgs {
    /// Full connection URL; takes precedence over the PG_* parameters.
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[arg(long, env = "PG_HOST", global = true)]
    pg_host: Option<String>,

    #[arg(long, env = "PG_PORT", default_value_t = 5432, global = true)]
    pg_port: u16,

    #[arg(long, env = "PG_USER", default_value = "postgres", global = true)]
    pg_user: String,

    #[arg(long, env = "PG_PASSWORD", default_value = "", global = true)]
    pg_password: String,

    #[arg(long, env = "PG_DB", default_value = "postgres", global = true)]
    pg_db: String,

    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, global = true)]
    max_connections: u32,
}

impl PostgresArgs {
    fn url(&self) -> Option<String> {
        self.database_url.clone().or_else(|| {
            self.pg_host.as_deref().map(|host| {
                postgres_url(host, self.pg_port, &self.pg_user, &self.pg_password, &self.pg_db)
            })
        })
    }
}

#[derive(Args)]
struct ZookeeperArgs {
    /// Without it the queue lock only coordinates within this process.
    #[arg(long, env = "ZK_HOST", global = true)]
    zk_host: Option<String>,

    #[arg(long, env = "ZK_PORT", default_value_t = DEFAULT_ZK_PORT, global = true)]
    zk_port: u16,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger tables (postgres store).
    Migrate,
    /// Authorize a new invoice.
    Purchase {
        transaction_id: TransactionId,
        amount: Amount,
    },
    /// Capture part or all of an invoice.
    Capture {
        transaction_id: TransactionId,
        amount: Amount,
    },
    /// Refund part or all of an invoice.
    Refund {
        transaction_id: TransactionId,
        amount: Amount,
    },
    /// Print an invoice as JSON.
    Invoice { transaction_id: TransactionId },
    /// Print ledger entries as CSV.
    Entries {
        transaction_id: TransactionId,
        #[arg(long)]
        status: Option<OperationStatus>,
    },
    /// Run a CSV file of `kind,transaction_id,amount` operations.
    Batch {
        input: PathBuf,
        /// Maximum captures and refunds in flight.
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            store: self.store,
            lock: self.lock,
            database_url: self.postgres.url(),
            zookeeper: self
                .zookeeper
                .zk_host
                .as_deref()
                .map(|host| zookeeper_endpoint(host, self.zookeeper.zk_port)),
            root_prefix: self.root_prefix.clone(),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            lock_timeout: self.lock_timeout_ms.map(Duration::from_millis),
            psp_latency: Duration::from_millis(self.psp_latency_ms),
            max_connections: self.postgres.max_connections,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    if let Command::Migrate = cli.command {
        return migrate(&settings).await;
    }

    let engine = settings.build_engine().await.into_diagnostic()?;
    match cli.command {
        Command::Migrate => {}
        Command::Purchase {
            transaction_id,
            amount,
        } => {
            let invoice = engine
                .authorize(transaction_id, amount)
                .await
                .into_diagnostic()?;
            print_json(&invoice)?;
        }
        Command::Capture {
            transaction_id,
            amount,
        } => {
            let operation = engine
                .capture(&transaction_id, amount)
                .await
                .into_diagnostic()?;
            print_json(&operation)?;
        }
        Command::Refund {
            transaction_id,
            amount,
        } => {
            let operation = engine
                .refund(&transaction_id, amount)
                .await
                .into_diagnostic()?;
            print_json(&operation)?;
        }
        Command::Invoice { transaction_id } => {
            let invoice = engine.invoice(&transaction_id).await.into_diagnostic()?;
            print_json(&invoice)?;
        }
        Command::Entries {
            transaction_id,
            status,
        } => {
            let entries = engine
                .entries(&transaction_id, status)
                .await
                .into_diagnostic()?;
            let stdout = io::stdout();
            LedgerWriter::new(stdout.lock())
                .write_entries(&entries)
                .into_diagnostic()?;
        }
        Command::Batch { input, concurrency } => {
            let summaries = run_batch(engine, input, concurrency).await?;
            let stdout = io::stdout();
            LedgerWriter::new(stdout.lock())
                .write_summaries(&summaries)
                .into_diagnostic()?;
        }
    }

    Ok(())
}

#[cfg(feature = "store-postgres")]
async fn migrate(settings: &Settings) -> Result<()> {
    let store = settings.connect_postgres().await.into_diagnostic()?;
    store.migrate().await.into_diagnostic()?;
    store.close().await;
    Ok(())
}

#[cfg(not(feature = "store-postgres"))]
async fn migrate(_settings: &Settings) -> Result<()> {
    Err(miette::miette!("built without PostgreSQL support"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

/// Purchases run first, in file order. Captures and refunds then run
/// concurrently, at most `concurrency` at a time.
async fn run_batch(
    engine: PaymentEngine,
    input: PathBuf,
    concurrency: usize,
) -> Result<Vec<InvoiceSummary>> {
    let file = File::open(input).into_diagnostic()?;
    let reader = OperationReader::new(file);

    let mut touched = Vec::new();
    let mut seen = HashSet::new();
    let mut operations = Vec::new();
    for record in reader.operations() {
        match record {
            Ok(record) => {
                if seen.insert(record.transaction_id.clone()) {
                    touched.push(record.transaction_id.clone());
                }
                match record.kind.operation() {
                    None => {
                        if let Err(e) = engine
                            .authorize(record.transaction_id, record.amount)
                            .await
                        {
                            eprintln!("Error processing operation: {}", e);
                        }
                    }
                    Some(kind) => operations.push((kind, record.transaction_id, record.amount)),
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }

    let engine = Arc::new(engine);
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for (kind, transaction_id, amount) in operations {
        let engine = engine.clone();
        let permit = permits.clone().acquire_owned().await.into_diagnostic()?;
        tasks.spawn(async move {
            let result = match kind {
                OperationKind::Capture => {
                    engine.capture(&transaction_id, amount).await
                }
                OperationKind::Refund => {
                    engine.refund(&transaction_id, amount).await
                }
            };
            if let Err(e) = result {
                eprintln!("Error processing operation: {}", e);
            }
            drop(permit);
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.into_diagnostic()?;
    }

    let mut summaries = Vec::with_capacity(touched.len());
    for transaction_id in touched {
        // Ids that never got a purchase have nothing to report.
        if let Ok(summary) = engine.summary(&transaction_id).await {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}
