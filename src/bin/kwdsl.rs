//! Keyword grammar inspection tool
//!
//! Compiles grammar declarations and prints the resulting keyword forest.
//!
//! # Usage
//!
//! ```bash
//! # Check every grammar under config/grammars
//! kwdsl check
//!
//! # Print the keyword tree of one grammar file as JSON
//! kwdsl inspect pipeline.kwdsl --format json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

use keyword_dsl::{
    ConfigLoader, GrammarSource, KeywordError, KeywordId, KeywordRegistry, KeywordRuntime,
    NativeHost,
};

#[derive(Parser)]
#[command(name = "kwdsl")]
#[command(version = "0.1.0")]
#[command(about = "Compile keyword DSL grammars and inspect the registered keywords")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory (keywords.yaml, grammars/)
    #[arg(long, global = true, env = "KEYWORD_DSL_CONFIG_DIR", default_value = "config")]
    config_dir: String,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile grammars and report syntax errors
    Check {
        /// Grammar files (defaults to every grammar in the config directory)
        files: Vec<PathBuf>,
    },

    /// Compile grammars and print their keyword trees
    Inspect {
        /// Grammar files (defaults to every grammar in the config directory)
        files: Vec<PathBuf>,
    },
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Check { files } => cmd_check(&cli, files),
        Commands::Inspect { files } => cmd_inspect(&cli, files),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn cmd_check(cli: &Cli, files: &[PathBuf]) -> Result<bool> {
    let (runtime, grammars) = prepare(cli, files)?;
    let mut ok = true;

    let mut reports = Vec::new();
    for grammar in &grammars {
        let outcome = runtime.declare_dsl(&grammar.dsl_name, &grammar.source, None);
        if outcome.is_err() {
            ok = false;
        }
        reports.push((grammar, outcome.map(|roots| roots.len())));
    }

    match cli.format {
        OutputFormat::Json => {
            let output: Vec<_> = reports
                .iter()
                .map(|(grammar, outcome)| match outcome {
                    Ok(roots) => serde_json::json!({
                        "dsl": grammar.dsl_name,
                        "file": grammar.path.display().to_string(),
                        "valid": true,
                        "roots": roots,
                    }),
                    Err(e) => serde_json::json!({
                        "dsl": grammar.dsl_name,
                        "file": grammar.path.display().to_string(),
                        "valid": false,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for (grammar, outcome) in &reports {
                match outcome {
                    Ok(roots) => println!(
                        "OK    {} ({} root keyword(s))",
                        grammar.path.display(),
                        roots
                    ),
                    Err(e) => println!("FAIL  {}: {}", grammar.path.display(), describe(e)),
                }
            }
        }
    }

    Ok(ok)
}

fn cmd_inspect(cli: &Cli, files: &[PathBuf]) -> Result<bool> {
    let (runtime, grammars) = prepare(cli, files)?;
    for grammar in &grammars {
        runtime
            .declare_dsl(&grammar.dsl_name, &grammar.source, None)
            .with_context(|| format!("Failed to compile {}", grammar.path.display()))?;
    }

    let registry = runtime.registry()?;
    match cli.format {
        OutputFormat::Json => {
            let output: Vec<_> = registry
                .dsl_names()
                .iter()
                .map(|dsl| {
                    let roots: Vec<_> = registry
                        .dsl_roots(Some(dsl.as_str()))
                        .iter()
                        .map(|root| tree_json(&registry, root.id()))
                        .collect();
                    serde_json::json!({ "dsl": dsl, "keywords": roots })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for dsl in registry.dsl_names() {
                println!("{}", dsl);
                for root in registry.dsl_roots(Some(dsl.as_str())) {
                    print_tree(&registry, root.id(), 1);
                }
            }
        }
    }

    Ok(true)
}

// =============================================================================
// HELPERS
// =============================================================================

fn prepare(
    cli: &Cli,
    files: &[PathBuf],
) -> Result<(KeywordRuntime<NativeHost>, Vec<GrammarSource>)> {
    let loader = ConfigLoader::new(cli.config_dir.clone());
    let config = loader.load_config()?;

    let grammars = if files.is_empty() {
        loader.load_grammars(&config)?
    } else {
        files
            .iter()
            .map(|path| ConfigLoader::load_grammar_file(path))
            .collect::<Result<Vec<_>>>()?
    };
    debug!(count = grammars.len(), "grammar sources loaded");

    Ok((KeywordRuntime::with_config(NativeHost::new(), config), grammars))
}

fn describe(error: &KeywordError) -> String {
    match error {
        KeywordError::Syntax(syntax) if !syntax.node.is_empty() => {
            format!("{}\n      near: {}", syntax, syntax.node.lines().next().unwrap_or(""))
        }
        other => other.to_string(),
    }
}

fn print_tree(registry: &KeywordRegistry, id: KeywordId, depth: usize) {
    let Some(definition) = registry.definition(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    println!(
        "{}{} [{:?}, {}]",
        indent,
        definition.name(),
        definition.name_mode(),
        definition.body_mode()
    );
    for property in definition.properties() {
        println!(
            "{}  - {}{}: {}",
            indent,
            property.name,
            if property.required { "" } else { "?" },
            property.type_constraint
        );
    }
    for child in registry.children(id) {
        print_tree(registry, child, depth + 1);
    }
}

fn tree_json(registry: &KeywordRegistry, id: KeywordId) -> serde_json::Value {
    let children: Vec<_> = registry
        .children(id)
        .into_iter()
        .map(|child| tree_json(registry, child))
        .collect();
    serde_json::json!({
        "path": registry.keyword_path(id),
        "definition": registry.definition(id).as_deref(),
        "children": children,
    })
}
