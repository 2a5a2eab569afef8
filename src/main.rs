use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipewright::config::Config;
use pipewright::connectors::ConnectorCategory;
use pipewright::error::Role;
use pipewright::expander::parse_metadata;
use pipewright::pipeline::{parse_pipeline_file, CanonicalDocument, DependencyGraph};
use pipewright::transport::{publish, DirectoryTransport, SubmissionStatus, SubmissionTarget};
use pipewright::Engine;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(about = "Validating compiler for declarative data pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/pipewright/config.toml)
    #[arg(short, long, global = true, env = "PIPEWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline definition
    Validate {
        /// Path to pipeline YAML or JSON file
        file: PathBuf,
    },
    /// Compile a pipeline into its canonical document
    Assemble {
        /// Path to pipeline YAML or JSON file
        file: PathBuf,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Pretty-print the document
        #[arg(long)]
        pretty: bool,
        /// Emit base64 definition parts instead of the document
        #[arg(long)]
        parts: bool,
    },
    /// Expand a metadata table into a pipeline and compile it
    Expand {
        /// Path to metadata YAML or JSON file (rows + template)
        file: PathBuf,
        /// Pipeline name (overrides the file's name)
        #[arg(short, long)]
        name: Option<String>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Pretty-print the document
        #[arg(long)]
        pretty: bool,
    },
    /// Show the dependency graph of a pipeline
    Graph {
        /// Path to pipeline YAML or JSON file
        file: PathBuf,
        /// Show topological order instead of the dependency tree
        #[arg(long)]
        order: bool,
    },
    /// Compile a pipeline and stage it in a local outbox directory
    Publish {
        /// Path to pipeline YAML or JSON file
        file: PathBuf,
        /// Target workspace id
        #[arg(short, long, env = "PIPEWRIGHT_WORKSPACE_ID")]
        workspace: String,
        /// Target pipeline id (defaults to the pipeline name)
        #[arg(short, long)]
        pipeline: Option<String>,
        /// Outbox root directory
        #[arg(long, default_value = "outbox")]
        out_dir: PathBuf,
    },
    /// List supported connectors
    Connectors {
        /// Only show one category: database|storage|service|generic|fabric
        #[arg(long)]
        category: Option<String>,
    },
    /// List supported activity types
    Activities,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pipewright=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => cmd_validate(cli.config.as_deref(), &file)?,
        Commands::Assemble {
            file,
            output,
            pretty,
            parts,
        } => cmd_assemble(cli.config.as_deref(), &file, output.as_deref(), pretty, parts)?,
        Commands::Expand {
            file,
            name,
            output,
            pretty,
        } => cmd_expand(cli.config.as_deref(), &file, name, output.as_deref(), pretty)?,
        Commands::Graph { file, order } => cmd_graph(cli.config.as_deref(), &file, order)?,
        Commands::Publish {
            file,
            workspace,
            pipeline,
            out_dir,
        } => cmd_publish(cli.config.as_deref(), &file, workspace, pipeline, &out_dir).await?,
        Commands::Connectors { category } => cmd_connectors(category.as_deref())?,
        Commands::Activities => cmd_activities()?,
        Commands::Completions { shell } => {
            cmd_completions(shell)?;
        }
    }

    Ok(())
}

/// Shell completion variants
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CompletionShell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

/// Generate shell completions
fn cmd_completions(shell: CompletionShell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let shell: Shell = shell.into();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}

fn load_engine(config_path: Option<&Path>) -> anyhow::Result<Engine> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => {
            let config = Config::load();
            config.validate()?;
            config
        }
    };
    Ok(Engine::new(config))
}

fn ensure_exists(file: &Path) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("File not found: {}", file.display());
    }
    Ok(())
}

fn render(document: &CanonicalDocument, pretty: bool, parts: bool) -> anyhow::Result<String> {
    if parts {
        let parts = serde_json::json!({ "parts": document.definition_parts()? });
        return Ok(serde_json::to_string_pretty(&parts)?);
    }
    Ok(if pretty {
        document.to_json_pretty()?
    } else {
        document.to_json()?
    })
}

fn write_output(content: &str, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, content)?;
            eprintln!("✓ Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

// ============================================================================
// Pipeline Commands
// ============================================================================

fn cmd_validate(config: Option<&Path>, file: &Path) -> anyhow::Result<()> {
    ensure_exists(file)?;
    let engine = load_engine(config)?;

    let definition = parse_pipeline_file(file)?;
    let report = engine.validate(&definition)?;

    println!("✓ Pipeline '{}' is valid", report.pipeline);
    println!();
    println!("  Activities: {}", report.activities);
    if report.total_activities != report.activities {
        println!("  Including nested: {}", report.total_activities);
    }
    println!("  Dependencies: {}", report.edges);
    println!("  Parameters: {}", report.parameters);
    println!("  Variables: {}", report.variables);

    Ok(())
}

fn cmd_assemble(
    config: Option<&Path>,
    file: &Path,
    output: Option<&Path>,
    pretty: bool,
    parts: bool,
) -> anyhow::Result<()> {
    ensure_exists(file)?;
    let engine = load_engine(config)?;

    let definition = parse_pipeline_file(file)?;
    let document = engine.compile(&definition)?;
    write_output(&render(&document, pretty, parts)?, output)
}

fn cmd_expand(
    config: Option<&Path>,
    file: &Path,
    name: Option<String>,
    output: Option<&Path>,
    pretty: bool,
) -> anyhow::Result<()> {
    ensure_exists(file)?;
    let engine = load_engine(config)?;

    let mut request = parse_metadata(&std::fs::read_to_string(file)?)?;
    if let Some(name) = name {
        request.name = name;
    }
    if request.name.trim().is_empty() {
        anyhow::bail!("Pipeline name is required: set `name` in the file or pass --name");
    }

    let document = engine.compile_expansion(&request)?;
    write_output(&render(&document, pretty, false)?, output)
}

fn cmd_graph(config: Option<&Path>, file: &Path, show_order: bool) -> anyhow::Result<()> {
    ensure_exists(file)?;
    let engine = load_engine(config)?;

    let definition = engine.check(&parse_pipeline_file(file)?)?;
    let graph = DependencyGraph::build(&definition.activities)?;

    if graph.is_empty() {
        println!("Pipeline '{}' has no activities.", definition.name);
        return Ok(());
    }

    if show_order {
        println!("Activity order for '{}':", definition.name);
        println!();
        for (i, name) in graph.topological_order().iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
    } else {
        println!("Dependency graph for '{}':", definition.name);
        println!();
        println!("{}", graph.to_text());
    }

    Ok(())
}

async fn cmd_publish(
    config: Option<&Path>,
    file: &Path,
    workspace: String,
    pipeline: Option<String>,
    out_dir: &Path,
) -> anyhow::Result<()> {
    ensure_exists(file)?;
    let engine = load_engine(config)?;

    let definition = parse_pipeline_file(file)?;
    let target = SubmissionTarget::new(workspace, pipeline.unwrap_or_else(|| definition.name.clone()));
    let transport = DirectoryTransport::new(out_dir);

    match publish(&engine, &transport, &target, &definition).await? {
        SubmissionStatus::Accepted => {
            println!("✓ Staged '{}' at {}", definition.name, transport.path_for(&target)?.display());
        }
        SubmissionStatus::AcceptedPending { operation } => {
            println!("✓ Staged '{}' (operation {})", definition.name, operation);
        }
        SubmissionStatus::Rejected { status, diagnostic } => {
            anyhow::bail!("Rejected ({}): {}", status, diagnostic);
        }
    }

    Ok(())
}

// ============================================================================
// Catalog Commands
// ============================================================================

fn cmd_connectors(category: Option<&str>) -> anyhow::Result<()> {
    let engine = Engine::default();
    let catalog = engine.catalog();

    let specs = match category {
        Some(c) => {
            let category = ConnectorCategory::parse(c)
                .ok_or_else(|| anyhow::anyhow!("Unknown category: {}", c))?;
            catalog.by_category(category)
        }
        None => catalog.list(),
    };

    println!("{:<28} {:<10} {:<8} LINKED SERVICE", "CONNECTOR", "CATEGORY", "ROLES");
    for spec in &specs {
        let roles = if spec.supports(Role::Sink) {
            "both"
        } else {
            "source"
        };
        let linked = if spec.requires_linked_service(Role::Sink) {
            "yes"
        } else {
            "-"
        };
        println!("{:<28} {:<10} {:<8} {}", spec.name, spec.category.as_str(), roles, linked);
    }
    println!();
    println!("{} connector(s)", specs.len());

    Ok(())
}

fn cmd_activities() -> anyhow::Result<()> {
    let engine = Engine::default();
    let descriptions = engine.registry().descriptions();

    println!("Supported activity types:");
    println!();
    for (name, description) in &descriptions {
        println!("  {:<28} {}", name, description);
    }

    Ok(())
}
