use clap::{Parser, ValueEnum};
use partitiondb::config::StoreConfig;
use partitiondb::storage::{DiskBackend, PartitionBackend, PartitionManager};
use partitiondb::types::TableKey;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DumpFormat {
    /// One JSON document for the whole dump
    Json,
    /// One line per row, tagged with tenant and table
    Jsonl,
}

#[derive(Debug, Parser)]
#[command(name = "pdb_dump")]
#[command(about = "Export partitiondb tables from a data directory as JSON", long_about = None)]
struct Args {
    /// Data directory path
    #[arg(short = 'd', long, default_value = "./data")]
    data_dir: PathBuf,

    /// Only this tenant (default: every tenant)
    #[arg(short = 't', long)]
    tenant: Option<String>,

    /// Only this table
    #[arg(long)]
    table: Option<String>,

    /// Export only schemas
    #[arg(long)]
    schema_only: bool,

    #[arg(short = 'f', long, value_enum, default_value = "json")]
    format: DumpFormat,

    /// Output file (default: stdout)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.schema_only && matches!(args.format, DumpFormat::Jsonl) {
        eprintln!("Error: --schema-only needs --format json");
        std::process::exit(1);
    }
    if !args.data_dir.is_dir() {
        eprintln!("Error: data directory {} does not exist", args.data_dir.display());
        std::process::exit(1);
    }

    let backend: Arc<dyn PartitionBackend> = Arc::new(DiskBackend::open(&args.data_dir)?);
    let manager = PartitionManager::new(Arc::clone(&backend), StoreConfig::default());

    let mut output: Box<dyn Write> = if let Some(path) = &args.output {
        Box::new(File::create(path)?)
    } else {
        Box::new(io::stdout())
    };

    let tenants = match &args.tenant {
        Some(t) => vec![t.clone()],
        None => backend.tenants()?,
    };

    let mut dumped = Vec::new();
    for tenant in tenants {
        let mut tables = Vec::new();
        for table in manager.list_tables(&tenant)? {
            if args.table.as_ref().is_some_and(|only| *only != table) {
                continue;
            }
            let key = TableKey::new(tenant.clone(), table.clone());
            let partitions = backend.partition_ids(&key)?.len();
            let (schema, rows) = manager.read_table(&key)?;

            match args.format {
                DumpFormat::Jsonl => {
                    for row in rows {
                        let line = json!({"tenant": tenant, "table": table, "row": row});
                        writeln!(output, "{line}")?;
                    }
                }
                DumpFormat::Json => {
                    let mut entry = json!({
                        "table": table,
                        "partitions": partitions,
                        "schema": schema,
                    });
                    if !args.schema_only {
                        entry["rows"] = serde_json::to_value(rows)?;
                    }
                    tables.push(entry);
                }
            }
        }
        if matches!(args.format, DumpFormat::Json) {
            dumped.push(json!({"tenant": tenant, "tables": tables}));
        }
    }

    if matches!(args.format, DumpFormat::Json) {
        let doc = json!({
            "dumpedAt": chrono::Utc::now().to_rfc3339(),
            "tenants": Value::Array(dumped),
        });
        writeln!(output, "{}", serde_json::to_string_pretty(&doc)?)?;
    }
    output.flush()?;
    Ok(())
}
