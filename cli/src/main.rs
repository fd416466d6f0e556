use clap::Parser;
use clap::Subcommand;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use viaduct_engine::plan::PlannedField;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::EngineConfig;
use viaduct_engine::ViaductEngine;

/// Operator tooling for the Viaduct execution engine.
#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the SDL of a scope-filtered schema view.
    Schema {
        /// Path to the central schema SDL.
        schema: PathBuf,
        /// Active scope ids; omit for the full schema.
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
    },
    /// Print the execution plan outline for an operation.
    Plan {
        /// Path to the central schema SDL.
        schema: PathBuf,
        /// Path to the operation document.
        operation: PathBuf,
        /// Active scope ids; omit for the full schema.
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
        /// Operation name when the document has several.
        #[arg(long)]
        name: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    match args.command {
        Command::Schema { schema, scopes } => {
            let engine = load_engine(&schema)?;
            let view = engine
                .schema_view(&schema_id(&scopes))
                .map_err(|error| error.to_string())?;
            println!("{}", view.schema().to_string());
            Ok(())
        }
        Command::Plan {
            schema,
            operation,
            scopes,
            name,
        } => {
            let engine = load_engine(&schema)?;
            let operation = fs::read_to_string(&operation)
                .map_err(|error| format!("could not read {}: {error}", operation.display()))?;
            let plan = engine
                .plan_operation(&operation, name.as_deref(), &schema_id(&scopes))
                .map_err(|error| error.to_string())?;
            println!("{} on {}", plan.kind(), plan.root_type());
            for field in plan.fields() {
                print_field(field, 1);
            }
            Ok(())
        }
    }
}

fn load_engine(path: &PathBuf) -> Result<ViaductEngine, String> {
    let sdl = fs::read_to_string(path)
        .map_err(|error| format!("could not read {}: {error}", path.display()))?;
    // Tooling inspects schemas and plans; resolver-backed fields would need
    // the embedder's registry, so the planner runs in its lenient mode.
    let mut config = EngineConfig::default();
    config.planner.allow_unregistered_resolvers = true;
    ViaductEngine::builder()
        .schema_sdl(sdl)
        .config(config)
        .build()
        .map_err(|error| error.to_string())
}

fn schema_id(scopes: &[String]) -> SchemaId {
    if scopes.is_empty() {
        SchemaId::Full
    } else {
        SchemaId::scoped("cli", scopes.iter().cloned())
    }
}

fn print_field(field: &PlannedField, depth: usize) {
    let indent = "  ".repeat(depth);
    let mut markers = String::new();
    if field.has_resolver() {
        markers.push_str(" @resolver");
    }
    if field.is_batched() {
        markers.push_str(" (batched)");
    }
    println!(
        "{indent}{}.{}{markers}",
        field.parent_type(),
        field.field_name(),
    );
    for sub in field.selections() {
        print_field(sub, depth + 1);
    }
}
