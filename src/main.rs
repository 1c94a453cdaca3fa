use anyhow::{bail, Context};
use clap::Parser as ClapParser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use search_compiler::lexer::tokenize;
use search_compiler::{validate_query, CompilerConfig, EntityType, QueryCompiler, Record};

#[derive(ClapParser)]
#[command(name = "search-compiler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile search queries into backend parameters and record filters")]
struct Cli {
    /// Compiler config (JSON). Defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entity the query targets (flows, alarms, rules, devices, target_lists)
    #[arg(short, long, default_value = "alarms")]
    entity: String,

    /// JSON array of records to run the compiled post-processing over
    #[arg(short, long)]
    records: Option<PathBuf>,

    /// Log every compilation step and post-processing stage
    #[arg(short, long)]
    debug: bool,

    /// Query to compile. Starts an interactive session when omitted
    query: Option<String>,
}

fn init_logging(debug: bool) {
    let default = if debug { "search_compiler=debug" } else { "search_compiler=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_records(path: &Path, entity: EntityType) -> anyhow::Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read records file {}", path.display()))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&content)
        .with_context(|| format!("records file {} must hold a JSON array", path.display()))?;
    Ok(values.into_iter().map(|v| Record::new(entity, v)).collect())
}

fn run_query(
    compiler: &QueryCompiler,
    query: &str,
    entity: EntityType,
    records: Option<&[Record]>,
) -> anyhow::Result<bool> {
    let compiled = compiler.compile(query, entity);
    println!("{}", serde_json::to_string_pretty(&compiled.summary())?);

    if let (Some(records), true) = (records, compiled.is_valid()) {
        let (kept, trace) = compiled.apply(records.to_vec(), compiler.config().debug);
        println!("\n[post-processing]");
        for stage in &trace.stages {
            println!("• {}: {} -> {}", stage.stage, stage.input, stage.output);
        }
        let data: Vec<_> = kept.into_iter().map(Record::into_data).collect();
        println!("{}", serde_json::to_string_pretty(&data)?);
    }
    Ok(compiled.is_valid())
}

const HELP: &str = "\
Enter a query to compile it for the current entity.

  :entity <name>    switch entity (flows, alarms, rules, devices, target_lists)
  :optimize <query> score a query and show its optimized form
  :tokens <query>   show the token stream
  :help             show this help
  :quit             exit";

fn repl(compiler: &QueryCompiler, mut entity: EntityType, records: Option<&[Record]>) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("search-compiler {} (:help for commands)", env!("CARGO_PKG_VERSION"));

    loop {
        let line = match editor.readline(&format!("{}> ", entity)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        editor.add_history_entry(line)?;

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            ":quit" | ":q" | ":exit" => break,
            ":help" | ":h" => println!("{}", HELP),
            ":entity" => match rest.parse::<EntityType>() {
                Ok(e) => {
                    entity = e;
                    println!("✓ entity set to {} ({} fields)", entity, entity.fields().len());
                }
                Err(e) => println!("✗ {}", e),
            },
            ":optimize" => {
                let check = validate_query(rest, compiler.config().max_complexity);
                println!("{}", serde_json::to_string_pretty(&check)?);
            }
            ":tokens" => match tokenize(rest) {
                Ok(tokens) => {
                    for token in tokens {
                        println!("{:>4} {:<13} {:?}", token.position(), token.kind.to_string(), token.value);
                    }
                }
                Err(e) => println!("✗ {}", e),
            },
            c if c.starts_with(':') => println!("✗ unknown command {} (:help for commands)", c),
            _ => {
                run_query(compiler, line, entity, records)?;
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = match &cli.config {
        Some(path) => CompilerConfig::from_json_file(path)?,
        None => CompilerConfig::default(),
    };
    config.debug |= cli.debug;

    let entity: EntityType = cli.entity.parse()?;
    let records = cli
        .records
        .as_deref()
        .map(|path| load_records(path, entity))
        .transpose()?;
    let compiler = QueryCompiler::new(config);

    match cli.query {
        Some(query) => {
            if !run_query(&compiler, &query, entity, records.as_deref())? {
                bail!("query is not valid");
            }
        }
        None => {
            tracing::info!(entity = %entity, "starting interactive session");
            repl(&compiler, entity, records.as_deref())?;
        }
    }
    Ok(())
}
