use anyhow::{bail, Context, Result};
use sqlite_native::pager::lock::LockLevel;
use sqlite_native::SQLite;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  // Parse arguments
  let args = std::env::args().collect::<Vec<_>>();
  match args.len() {
    0 | 1 => bail!("Missing <database path> and <command>"),
    2 => bail!("Missing <command>"),
    _ => {}
  }

  let db = SQLite::open(&args[1]).with_context(|| format!("opening {}", args[1]))?;

  // Parse command and act accordingly
  let command = &args[2];
  match command.as_str() {
    ".dbinfo" => {
      let header = db.header()?;
      let tables = db.table_names()?;
      println!("database page size: {}", header.page_size);
      println!("number of tables: {}", tables.len());
    }
    ".tables" => {
      println!("{}", db.table_names()?.join(" "));
    }
    "header" => {
      print!("{}", db.header()?);
    }
    "locks" => {
      let pager = db.pager();
      pager.lock(LockLevel::Shared)?;
      println!("acquired {} lock", pager.lock_level());
      pager.unlock(LockLevel::NoLock)?;
      println!("released to {}", pager.lock_level());
    }
    "explain" => {
      let Some(query) = args.get(3) else {
        bail!("Missing [query]");
      };
      print!("{}", db.prepare(query)?);
    }
    "query" => {
      let Some(query) = args.get(3) else {
        bail!("Missing [query]");
      };
      let mut execution = db.query(query)?;
      println!("{}", execution.columns().join("|"));
      while let Some(row) = execution.next_row().context("executing query")? {
        let row: Vec<String> = row.iter().map(ToString::to_string).collect();
        println!("{}", row.join("|"));
      }
    }
    query if query.to_lowercase().starts_with("select count(*) from") => {
      let table = query
        .split_whitespace()
        .last()
        .context("Invalid query: no table name found")?;
      match db.count_table_rows(table)? {
        Some(rows) => println!("{}", rows),
        None => bail!("Table not found: {}", table),
      }
    }
    _ => bail!("Missing or invalid command passed: {}", command),
  }

  db.close()?;
  Ok(())
}
