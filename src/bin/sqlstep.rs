use sqlstep::config::{self, DriverConfig};
use sqlstep::{Connection, DriverError, Result, Statement};
use std::io::{self, BufRead, Write};
use tracing::{debug, info};

const USAGE: &str = "usage: sqlstep [--config <file>] <database> [SQL ...]";

struct Args {
    config: Option<String>,
    database: String,
    sql: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut config = None;
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(
                args.next()
                    .ok_or_else(|| DriverError::Config("--config needs a file".to_string()))?,
            );
        } else {
            positional.push(arg);
        }
    }
    if positional.is_empty() {
        return Err(DriverError::Config(USAGE.to_string()));
    }
    let database = positional.remove(0);
    Ok(Args {
        config,
        database,
        sql: positional,
    })
}

/// Runs one SQL string and writes its outcome to `out`.
fn run_sql(stmt: &mut Statement, sql: &str, out: &mut impl Write) -> Result<()> {
    debug!("running: {}", sql);
    if stmt.execute(sql)? {
        if let Some(mut rows) = stmt.result_set()? {
            writeln!(out, "{}", serde_json::to_string(&rows.column_names()?)?)?;
            while rows.next()? {
                writeln!(out, "{}", serde_json::to_string(&rows.values()?)?)?;
            }
        }
    } else {
        writeln!(out, "changes: {}", stmt.update_count()?)?;
    }
    Ok(())
}

fn run(args: Args, config: &DriverConfig) -> Result<()> {
    let conn = Connection::open_with_config(&args.database, config)?;
    let mut stmt = conn.create_statement()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.sql.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            run_sql(&mut stmt, &line, &mut out)?;
        }
    } else {
        for sql in &args.sql {
            run_sql(&mut stmt, sql, &mut out)?;
        }
    }

    stmt.close()?;
    conn.close()
}

fn main() {
    let result = parse_args(std::env::args().skip(1)).and_then(|args| {
        let config = match &args.config {
            Some(path) => config::load_config(path)?,
            None => config::load_default_config()?,
        };

        // Initialize the logging system using tracing subscriber
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_max_level(config.logging.level()?)
            .init();
        info!("Starting sqlstep on {}", args.database);

        run(args, &config)
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--config", "c.toml", "db.sqlite", "SELECT 1"]).unwrap();
        assert_eq!(parsed.config.as_deref(), Some("c.toml"));
        assert_eq!(parsed.database, "db.sqlite");
        assert_eq!(parsed.sql, vec!["SELECT 1"]);

        assert!(args(&[]).is_err());
        assert!(args(&["db.sqlite", "--config"]).is_err());
    }

    #[test]
    fn test_run_sql_output() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.create_statement().unwrap();
        let mut out = Vec::new();

        run_sql(&mut stmt, "CREATE TABLE t (a, b)", &mut out).unwrap();
        run_sql(&mut stmt, "INSERT INTO t VALUES (5, 'x')", &mut out).unwrap();
        run_sql(&mut stmt, "SELECT a, b FROM t", &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "changes: 0\nchanges: 1\n[\"a\",\"b\"]\n[5,\"x\"]\n");
    }
}
