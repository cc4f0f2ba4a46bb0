//! lurch-validate CLI: serialize documents and drive the validation worker.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use lurch_validation::client::ValidationClient;
use lurch_validation::config::ValidationConfig;
use lurch_validation::correlation::{Origin, RunContext};
use lurch_validation::element::DocumentDescription;
use lurch_validation::engine::NoopEngine;
use lurch_validation::feedback::{self, FeedbackItem};
use lurch_validation::message::{self, JsonSink, MessageSink, StdoutSink};
use lurch_validation::serializer::{self, Encoding};
use lurch_validation::worker;

#[derive(Parser)]
#[command(name = "lurch-validate", version, about = "Validation messaging for Lurch documents")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Wire encoding (json or putdown); overrides the config file.
    #[arg(long, global = true)]
    encoding: Option<Encoding>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serialize a document description and print the document message.
    Serialize {
        /// JSON document description.
        document: PathBuf,
    },

    /// Convert a tree between encodings.
    Convert {
        /// File holding one tree.
        file: PathBuf,

        /// Encoding of the input; guessed from the content when omitted.
        #[arg(long)]
        from: Option<Encoding>,

        /// Encoding to write.
        #[arg(long)]
        to: Encoding,
    },

    /// Run the whole pipeline on a worker thread and print every message.
    Run {
        /// JSON document description.
        document: PathBuf,

        /// Readable lines instead of NDJSON.
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a document and summarize feedback per element.
    Check {
        /// JSON document description.
        document: PathBuf,
    },

    /// Present raw feedback items (a JSON array).
    Present {
        file: PathBuf,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration.
    Init {
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    // stdout carries messages; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ValidationConfig::load(path)?,
        None => ValidationConfig::default(),
    };
    if let Some(encoding) = cli.encoding {
        config.encoding = encoding;
    }

    match cli.command {
        Commands::Serialize { document } => {
            let elements = DocumentDescription::load(&document)?.ordered_elements()?;
            let doc = serializer::serialize(&elements, config.encoding, RunContext::first())?;
            JsonSink.emit(&doc.message);
            JsonSink.emit_batch(&doc.deferred);
        }

        Commands::Convert { file, from, to } => {
            let text = std::fs::read_to_string(&file).into_diagnostic()?;
            let from = from.unwrap_or_else(|| guess_encoding(&text));
            let root = worker::decode(from.as_str(), &text)?;
            println!("{}", to.encode(&root)?);
        }

        Commands::Run { document, pretty } => {
            let sink: Box<dyn MessageSink> = if pretty {
                Box::new(StdoutSink)
            } else {
                Box::new(JsonSink)
            };
            run_pipeline(&document, config, sink.as_ref())?;
        }

        Commands::Check { document } => {
            let elements = DocumentDescription::load(&document)?.ordered_elements()?;
            let mut client = ValidationClient::new(NoopEngine, config)?;
            let report = client.validate(&elements)?;
            client.shutdown()?;

            for routed in &report.feedback {
                let target = match routed.origin {
                    Some(Origin::Element(index)) => format!("element {index}"),
                    Some(Origin::Document) => "document".to_string(),
                    None => "(unidentified)".to_string(),
                };
                for p in &routed.presentations {
                    println!("{target}: {} {} ({})", p.code, p.result, p.reason);
                }
                for item in &routed.unrecognized {
                    println!("{target}: unrecognized feedback type {}", item.kind);
                }
            }
            for error in &report.errors {
                match error.origin {
                    Some(Origin::Element(index)) => println!("element {index}: error: {}", error.text),
                    _ => println!("error: {}", error.text),
                }
            }
            println!(
                "{}: {} feedback, {} errors{}",
                report.run,
                report.feedback.len(),
                report.errors.len(),
                if report.is_clean() { ", clean" } else { "" }
            );
        }

        Commands::Present { file } => {
            let text = std::fs::read_to_string(&file).into_diagnostic()?;
            let items: Vec<FeedbackItem> = serde_json::from_str(&text).into_diagnostic()?;
            for item in &items {
                match feedback::present(item) {
                    Some(p) => println!("{}", serde_json::to_string(&p).into_diagnostic()?),
                    None => tracing::warn!(kind = %item.kind, "no presentation for feedback type"),
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    miette::bail!(
                        "{} already exists; pass --force to overwrite",
                        path.display()
                    );
                }
                ValidationConfig::default().save(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config).into_diagnostic()?);
            }
        },
    }

    Ok(())
}

/// Send one document through a fresh worker, printing everything until `done`.
fn run_pipeline(document: &Path, config: ValidationConfig, sink: &dyn MessageSink) -> Result<()> {
    let elements = DocumentDescription::load(document)?.ordered_elements()?;
    let doc = serializer::serialize(&elements, config.encoding, RunContext::first())?;

    let handle = worker::spawn_worker(NoopEngine, config)?;
    handle.send(&doc.message)?;
    sink.emit(&doc.message);
    sink.emit_batch(&doc.deferred);

    loop {
        let reply = handle.recv()?;
        sink.emit(&reply);
        if reply.is(message::DONE) {
            break;
        }
    }
    handle.shutdown()?;
    Ok(())
}

/// Putdown environments also open with `{`, so only a JSON object counts as JSON.
fn guess_encoding(text: &str) -> Encoding {
    if serde_json::from_str::<serde_json::Value>(text).is_ok_and(|v| v.is_object()) {
        Encoding::Json
    } else {
        Encoding::Putdown
    }
}
