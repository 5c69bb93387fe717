//! pagedb - inspect and exercise a paged storage directory

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use log::info;
use pagedb::access::{ColumnType, Value};
use pagedb::catalog::ColumnInfo;
use pagedb::config::{EngineConfig, DEFAULT_BTREE_ORDER, DEFAULT_BUFFER_POOL_CAPACITY};
use pagedb::database::Database;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;

/// pagedb - a paged storage engine with B+Tree primary-key indexes
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./pagedb_data")]
    data_dir: PathBuf,

    /// Buffer pool capacity in pages
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_POOL_CAPACITY)]
    pool_size: usize,

    /// Order of newly created B+Tree indexes
    #[arg(short, long, default_value_t = DEFAULT_BTREE_ORDER)]
    order: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fill a sample table with shuffled rows, delete some and verify
    Demo {
        /// Rows to insert
        #[arg(short, long, default_value_t = 1000)]
        rows: i32,

        /// Seed for the insert and delete order
        #[arg(short, long, default_value_t = 42)]
        seed: u64,
    },
    /// Check every index against its table
    Verify,
    /// List tables with their row counts
    Tables,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = EngineConfig {
        buffer_pool_capacity: args.pool_size,
        btree_order: args.order,
    };
    let mut db = Database::open(&args.data_dir, config)
        .with_context(|| format!("Failed to open database at {}", args.data_dir.display()))?;

    match args.command {
        Command::Demo { rows, seed } => run_demo(&mut db, rows, seed)?,
        Command::Verify => run_verify(&mut db)?,
        Command::Tables => run_tables(&mut db)?,
    }

    db.flush().context("Failed to flush database")?;
    Ok(())
}

fn run_demo(db: &mut Database, rows: i32, seed: u64) -> Result<()> {
    let name = next_demo_table(db);
    db.create_table(
        &name,
        vec![
            ColumnInfo::new("id", ColumnType::integer()).primary_key(),
            ColumnInfo::new("name", ColumnType::varchar(24)),
            ColumnInfo::new("score", ColumnType::double()),
            ColumnInfo::new("active", ColumnType::boolean()),
        ],
    )
    .with_context(|| format!("Failed to create table {}", name))?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut ids: Vec<i32> = (0..rows).collect();
    ids.shuffle(&mut rng);

    for &id in &ids {
        let values = vec![
            Value::Integer(id),
            Value::String(format!("user-{}", id)),
            Value::Double(id as f64 * 1.5),
            Value::Boolean(id % 2 == 0),
        ];
        db.insert_record(&name, values)
            .with_context(|| format!("Failed to insert id {}", id))?;
    }
    info!("inserted {} rows into {}", ids.len(), name);

    ids.shuffle(&mut rng);
    let doomed = &ids[..ids.len() / 3];
    for &id in doomed {
        db.delete_by_key(&name, &Value::Integer(id))
            .with_context(|| format!("Failed to delete id {}", id))?;
    }
    info!("deleted {} rows from {}", doomed.len(), name);

    let mut updated = 0;
    for &id in ids[ids.len() / 3..].iter().take(10) {
        let values = vec![
            Value::Integer(id),
            Value::String(format!("renamed-{}", id)),
            Value::Double(0.0),
            Value::Boolean(false),
        ];
        db.update_record(&name, &Value::Integer(id), values)?;
        updated += 1;
    }
    info!("updated {} rows in {}", updated, name);

    run_verify(db)?;

    let stats = db.stats();
    println!(
        "buffer pool: {} hits, {} misses, {} evictions, {} write-backs",
        stats.hits, stats.misses, stats.evictions, stats.write_backs
    );
    Ok(())
}

fn next_demo_table(db: &Database) -> String {
    (1..)
        .map(|n| format!("demo_{}", n))
        .find(|name| db.get_table(name).is_none())
        .unwrap_or_else(|| "demo".to_string())
}

fn run_verify(db: &mut Database) -> Result<()> {
    let summaries = db.verify().context("Verification failed")?;
    for summary in &summaries {
        match summary.index_height {
            Some(height) => println!(
                "ok  {:<20} {:>8} rows {:>6} pages  index height {}",
                summary.table_name, summary.rows, summary.pages, height
            ),
            None => println!(
                "ok  {:<20} {:>8} rows {:>6} pages  no index",
                summary.table_name, summary.rows, summary.pages
            ),
        }
    }
    println!("{} tables verified", summaries.len());
    Ok(())
}

fn run_tables(db: &mut Database) -> Result<()> {
    let tables: Vec<_> = db
        .list_tables()
        .into_iter()
        .map(|t| (t.table_name.clone(), t.columns.clone()))
        .collect();
    if tables.is_empty() {
        println!("no tables");
        return Ok(());
    }

    for (name, columns) in tables {
        let rows = db.row_count(&name)?;
        let columns: Vec<String> = columns
            .iter()
            .map(|c| {
                let key = if c.is_primary_key { " key" } else { "" };
                format!("{} {:?}{}", c.column_name, c.data_type(), key)
            })
            .collect();
        println!("{:<20} {:>8} rows  ({})", name, rows, columns.join(", "));
    }
    Ok(())
}
