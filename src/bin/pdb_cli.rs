use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Table as ComfyTable};
use config::{Config, Environment, File};
use partitiondb::network::{Request, Response};
use partitiondb::parser::parse_query;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// partitiondb interactive client
#[derive(Parser, Debug)]
#[command(name = "pdb_cli")]
#[command(about = "Interactive client for a partitiondb server", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Tenant to act as
    #[arg(short = 't', long)]
    tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_tenant")]
    tenant: String,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 7878 }
fn default_tenant() -> String { "default".to_string() }

impl ClientConfig {
    /// CLI args > PARTITIONDB_CLI_* env > config file > defaults
    fn load(args: &Args) -> Self {
        let config_paths = ["/etc/partitiondb/pdb_cli.toml", "./pdb_cli.toml"];

        let mut builder = Config::builder();
        if let Some(path) = config_paths.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::with_name(path));
            eprintln!("Loaded config from: {path}");
        }
        builder = builder.add_source(Environment::with_prefix("PARTITIONDB_CLI").separator("_"));

        let base = builder
            .build()
            .ok()
            .and_then(|c| c.try_deserialize::<Self>().ok())
            .unwrap_or_else(|| Self {
                host: default_host(),
                port: default_port(),
                tenant: default_tenant(),
            });

        Self {
            host: args.host.clone().unwrap_or(base.host),
            port: args.port.unwrap_or(base.port),
            tenant: args.tenant.clone().unwrap_or(base.tenant),
        }
    }
}

const HELP: &str = "\
Meta-commands:
  \\q, \\quit                       - Quit
  \\tenant [name]                   - Show or switch tenant
  \\dt                              - List tables
  \\d <table>                       - Show table schema
  \\usage                           - Storage usage for the tenant
  \\read <table>                    - Every row of a table
  \\add <table> <json>              - Insert a row
  \\set <table> <rowId> <col> <json> - Update one cell
  \\del <table> <rowId>             - Delete a row
  \\?, \\help                       - Show this help

Anything else is sent as a query document, e.g.
  {\"from\": \"orders\", \"where\": {\"field\": \"total\", \"op\": \"gt\", \"value\": 10}}
A line with an \"op\" key is sent as a raw request.";

enum Command {
    Send(Request),
    Quit,
    Handled,
}

fn parse_json(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))
}

/// Turn one input line into a request, or handle it locally
fn interpret(input: &str, tenant: &mut String) -> Result<Command, String> {
    let tenant_name = tenant.clone();
    if !input.starts_with('\\') {
        if let Ok(raw) = Request::decode(input) {
            return Ok(Command::Send(raw));
        }
        let query = parse_query(input).map_err(|e| e.to_string())?;
        return Ok(Command::Send(Request::Query {
            tenant: tenant_name,
            query,
            options: None,
        }));
    }

    let mut parts = input.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();
    let mut words = rest.split_whitespace();

    let request = match command {
        "\\q" | "\\quit" => return Ok(Command::Quit),
        "\\?" | "\\h" | "\\help" => {
            println!("{HELP}");
            return Ok(Command::Handled);
        }
        "\\tenant" => {
            if !rest.is_empty() {
                *tenant = rest.to_string();
            }
            println!("Tenant: {tenant}");
            return Ok(Command::Handled);
        }
        "\\dt" => Request::ListTables { tenant: tenant_name },
        "\\usage" => Request::Usage { tenant: tenant_name },
        "\\d" | "\\read" => {
            let table = words.next().ok_or("missing table name")?.to_string();
            if command == "\\d" {
                Request::GetSchema { tenant: tenant_name, table }
            } else {
                Request::ReadTable { tenant: tenant_name, table }
            }
        }
        "\\add" => {
            let (table, json) = rest.split_once(char::is_whitespace).ok_or("usage: \\add <table> <json>")?;
            Request::AddRow {
                tenant: tenant_name,
                table: table.to_string(),
                row: parse_json(json.trim())?,
            }
        }
        "\\set" => {
            let mut fields = rest.splitn(4, char::is_whitespace);
            let (Some(table), Some(row_id), Some(column), Some(json)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err("usage: \\set <table> <rowId> <column> <json>".to_string());
            };
            Request::UpdateCell {
                tenant: tenant_name,
                table: table.to_string(),
                row_id: row_id.to_string(),
                column: column.to_string(),
                value: parse_json(json.trim())?,
            }
        }
        "\\del" => {
            let (Some(table), Some(row_id)) = (words.next(), words.next()) else {
                return Err("usage: \\del <table> <rowId>".to_string());
            };
            Request::DeleteRow {
                tenant: tenant_name,
                table: table.to_string(),
                row_id: row_id.to_string(),
            }
        }
        _ => return Err(format!("Unknown meta-command: {command}. Use \\? for help.")),
    };
    Ok(Command::Send(request))
}

/// Rows render as a table; anything else as pretty JSON
fn render(result: &Value) {
    let rows = match result {
        Value::Object(map) => map.get("rows").and_then(Value::as_array),
        _ => None,
    };
    let Some(rows) = rows else {
        println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
        return;
    };

    let mut columns: Vec<String> = result
        .get("columns")
        .and_then(Value::as_array)
        .map(|cols| cols.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if columns.is_empty() {
        for row in rows {
            if let Some(obj) = row.as_object() {
                for key in obj.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }
    }

    let mut table = ComfyTable::new();
    table.load_preset(UTF8_FULL);
    table.set_header(columns.iter().map(Cell::new));
    for row in rows {
        table.add_row(columns.iter().map(|c| match row.get(c) {
            None | Some(Value::Null) => Cell::new("NULL"),
            Some(Value::String(s)) => Cell::new(s),
            Some(other) => Cell::new(other.to_string()),
        }));
    }
    println!("{table}");

    let mut footer = format!("({} rows)", rows.len());
    if let Some(total) = result.get("total").and_then(Value::as_u64) {
        footer.push_str(&format!(", {total} total"));
    }
    if let Some(ms) = result.pointer("/stats/elapsedMs").and_then(Value::as_u64) {
        footer.push_str(&format!(", {ms} ms"));
    }
    println!("{footer}");
}

async fn round_trip(
    reader: &mut BufReader<ReadHalf<'_>>,
    writer: &mut WriteHalf<'_>,
    request: &Request,
) -> Result<Option<Response>, Box<dyn std::error::Error>> {
    let mut line = request.encode()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    let mut reply = String::new();
    if reader.read_line(&mut reply).await? == 0 {
        return Ok(None);
    }
    Ok(Some(Response::decode(&reply)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = ClientConfig::load(&args);

    let addr = format!("{}:{}", config.host, config.port);
    println!("Connecting to {addr}...");
    let mut stream = match TcpStream::connect(&addr).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Connection failed: {e}");
            eprintln!("Is the server running? Start it with: partitiondb --port {}", config.port);
            return Err(e.into());
        }
    };
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut rl = DefaultEditor::new()?;
    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".pdb_cli_history");
        p
    });
    if let Some(ref path) = history_file {
        let _ = rl.load_history(path);
    }

    let mut tenant = config.tenant;
    println!("Connected. Tenant: {tenant}. Type \\? for help, \\q to quit.\n");

    loop {
        let input = match rl.readline(&format!("{tenant}> ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err:?}");
                break;
            }
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let request = match interpret(input, &mut tenant) {
            Ok(Command::Send(request)) => request,
            Ok(Command::Quit) => break,
            Ok(Command::Handled) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        match round_trip(&mut reader, &mut writer, &request).await? {
            None => {
                eprintln!("Connection closed by server");
                break;
            }
            Some(Response { ok: true, result, .. }) => render(&result.unwrap_or(Value::Null)),
            Some(Response { error, .. }) => match error {
                Some(e) => eprintln!("{}: {}", e.kind, e.message),
                None => eprintln!("request failed"),
            },
        }
    }

    if let Some(ref path) = history_file {
        let _ = rl.save_history(path);
    }
    println!("Bye");
    Ok(())
}
