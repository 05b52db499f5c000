//! Command implementations
//!
//! Results go to stdout as JSON lines; logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use futures::StreamExt;
use querylane_core::users::{CreateUserTable, ImportUsers, UpdateUserEmail};
use querylane_core::{
    ExecOptions, ExecuteQuery, QueryExecutor, ResultCache, StreamingReader,
};
use querylane_db::{Record, SeedReport, SqliteConnector, UserRepository, Value, read_users_csv};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Create the user table and import users from a CSV file
    Seed {
        /// CSV file with name,email,age columns
        csv: PathBuf,
    },
    /// Run a query and print every row
    Query {
        sql: String,
        /// Bound parameter, in order (repeatable); quote it ('007') to bind as text
        #[arg(long = "param")]
        params: Vec<String>,
        /// Serve repeated runs from the result cache
        #[arg(long, default_value_t = false)]
        cached: bool,
        /// Run the query this many times
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Change a user's email inside a transaction
    UpdateEmail { user_id: String, new_email: String },
    /// Stream users one row at a time
    Stream {
        /// Stop after this many rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Stream users in batches
    Batches {
        #[arg(long)]
        size: Option<usize>,
    },
    /// Stream users in batches, keeping those older than a threshold
    Filter {
        #[arg(long)]
        size: Option<usize>,
        #[arg(long, default_value_t = 25.0)]
        min_age: f64,
    },
    /// Walk the table page by page, one connection per page
    Paginate {
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Fetch a single page
    Page {
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Average age over the streamed ages
    Average,
    /// Fetch all users and older users concurrently
    Concurrent {
        #[arg(long, default_value_t = 40.0)]
        min_age: f64,
    },
}

/// Executor and reader built from one configuration
pub struct App {
    executor: QueryExecutor<SqliteConnector>,
    reader: StreamingReader<SqliteConnector>,
    repo: UserRepository,
}

impl App {
    pub fn new(config: &Config) -> Result<Self> {
        if let Some(parent) = Path::new(&config.database.path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let connector = Arc::new(SqliteConnector::from_path(&config.database.path));
        let repo = UserRepository::new(&config.database.table)?;

        let executor = QueryExecutor::new(
            connector.clone(),
            config.retry.policy(),
            Arc::new(ResultCache::new()),
        )
        .with_fingerprint_mode(config.cache.fingerprint)
        .with_query_logging(config.logging.log_queries);

        let reader = StreamingReader::new(connector, config.streaming.stream_config())
            .with_repository(repo.clone());

        Ok(Self {
            executor,
            reader,
            repo,
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.executor
            .execute(
                CreateUserTable {
                    repo: self.repo.clone(),
                },
                ExecOptions::default(),
            )
            .await?;
        Ok(())
    }

    pub async fn seed(&self, csv_path: &Path) -> Result<SeedReport> {
        let file = std::fs::File::open(csv_path)
            .with_context(|| format!("Failed to open {:?}", csv_path))?;
        let users = read_users_csv(file)?;

        let report = self
            .executor
            .execute(
                ImportUsers::new(self.repo.clone(), users),
                ExecOptions::transactional(),
            )
            .await?;

        info!(
            "Seeded {}: {} inserted, {} skipped",
            self.repo.table(),
            report.inserted,
            report.skipped
        );
        Ok(report)
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[String],
        cached: bool,
        repeat: usize,
    ) -> Result<Vec<Record>> {
        if repeat == 0 {
            bail!("repeat must be at least 1");
        }

        let params: Vec<Value> = params.iter().map(|p| Value::parse_literal(p)).collect();
        let options = ExecOptions {
            cached,
            transactional: false,
        };

        let mut records = Vec::new();
        for _ in 0..repeat {
            records = self
                .executor
                .execute(ExecuteQuery::with_params(sql, params.clone()), options)
                .await?;
        }

        if cached {
            let stats = self.executor.cache().stats();
            info!(
                "Result cache: {} entries, {} hits, {} misses",
                stats.entry_count, stats.hit_count, stats.miss_count
            );
        }
        Ok(records)
    }

    pub async fn update_email(&self, user_id: &str, new_email: &str) -> Result<()> {
        self.executor
            .execute(
                UpdateUserEmail::new(self.repo.clone(), user_id, new_email),
                ExecOptions::transactional(),
            )
            .await?;
        info!("Updated email for user {}", user_id);
        Ok(())
    }

    pub fn reader(&self) -> &StreamingReader<SqliteConnector> {
        &self.reader
    }
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Run one command against the app
pub async fn run(app: &App, command: Command) -> Result<()> {
    let reader = app.reader();
    let config = *reader.config();

    match command {
        Command::InitConfig { .. } => bail!("init-config runs before the database is opened"),
        Command::Seed { csv } => emit(&app.seed(&csv).await?)?,
        Command::Query {
            sql,
            params,
            cached,
            repeat,
        } => {
            for record in app.query(&sql, &params, cached, repeat).await? {
                emit(&record)?;
            }
        }
        Command::UpdateEmail { user_id, new_email } => {
            app.update_email(&user_id, &new_email).await?
        }
        Command::Stream { limit } => {
            let rows = reader.stream_rows();
            let mut rows = match limit {
                Some(n) => rows.take(n).boxed(),
                None => rows,
            };
            while let Some(row) = rows.next().await {
                emit(&row?)?;
            }
        }
        Command::Batches { size } => {
            let mut batches = reader.stream_batches(size.unwrap_or(config.batch_size))?;
            while let Some(batch) = batches.next().await {
                emit(&batch?)?;
            }
        }
        Command::Filter { size, min_age } => {
            let mut users = reader.batch_filter(size.unwrap_or(config.batch_size), min_age)?;
            while let Some(user) = users.next().await {
                emit(&user?)?;
            }
        }
        Command::Paginate { page_size } => {
            let mut pages = reader.paginate(page_size.unwrap_or(config.page_size))?;
            let mut number = 0usize;
            while let Some(page) = pages.next().await {
                number += 1;
                let page = page?;
                info!("Page {}: {} rows", number, page.len());
                emit(&page)?;
            }
        }
        Command::Page { page_size, offset } => {
            let page = reader
                .fetch_page(page_size.unwrap_or(config.page_size), offset)
                .await?;
            emit(&page)?;
        }
        Command::Average => match reader.average_age().await? {
            Some(average) => println!("Average age of users: {:.2}", average),
            None => println!("No users found."),
        },
        Command::Concurrent { min_age } => {
            let (all_users, older_users) = reader.fetch_concurrently(min_age).await?;
            emit(&serde_json::json!({
                "all_users": all_users,
                "older_users": older_users,
            }))?;
        }
    }

    Ok(())
}
