use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser as ClapParser, ValueEnum};
use querysmith::parser::Parser;
use querysmith::query::Query;
use querysmith::{mongo, sql};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Target {
    Sql,
    Mongo,
}

/// Compile a query definition against a schema to SQL or a MongoDB pipeline.
#[derive(ClapParser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), about, version)]
struct Cli {
    /// Schema DSL file
    schema: PathBuf,

    /// Query definition (JSON)
    query: PathBuf,

    #[arg(short, long, value_enum, default_value = "sql")]
    target: Target,

    /// SQL dialect: generic, postgresql, mysql
    #[arg(short, long, default_value = "generic")]
    dialect: sql::Dialect,

    /// One clause or stage element per line
    #[arg(short, long)]
    pretty: bool,

    /// Emit the bare stage array instead of shell text (mongo only)
    #[arg(long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn read(path: &PathBuf) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", path.display(), e);
        process::exit(1);
    })
}

fn main() {
    env_logger::builder()
        .format_timestamp(None)
        .parse_env(env_logger::Env::default().default_filter_or("warn"))
        .init();

    let cli = Cli::parse();

    let parsed = Parser::new(&read(&cli.schema)).parse();
    for err in &parsed.errors {
        log::warn!("{}: {}", cli.schema.display(), err);
    }

    let query: Query = match serde_json::from_str(&read(&cli.query)) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("Invalid query in {}: {}", cli.query.display(), e);
            process::exit(1);
        }
    };

    let text = match cli.target {
        Target::Sql => {
            let options = sql::Options::default()
                .with_dialect(cli.dialect)
                .with_pretty(cli.pretty);
            sql::generate(&query, &parsed.schema, &options)
        }
        Target::Mongo => {
            let output = if cli.json {
                mongo::Output::Json
            } else {
                mongo::Output::Shell
            };
            let options = mongo::Options::default()
                .with_output(output)
                .with_pretty(cli.pretty);
            mongo::generate(&query, &parsed.schema, &options)
        }
    };

    match cli.output {
        Some(path) => {
            if let Err(e) = fs::write(&path, format!("{text}\n")) {
                eprintln!("Failed to write {}: {}", path.display(), e);
                process::exit(1);
            }
        }
        None => println!("{text}"),
    }
}
