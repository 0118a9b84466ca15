//! Plugbridge CLI - tools for working with bridge schemas
//!
//! Commands:
//!   plugbridge check <schema>                         - Validate and print the interface
//!   plugbridge generate <schema> --target <t> --out <dir> - Write native and host bindings

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use plugbridge::codegen::{generate, Target};
use plugbridge::registry::Registry;
use plugbridge::types::{Function, Param, Type, TypeDef};

#[derive(Parser)]
#[command(name = "plugbridge")]
#[command(about = "Generate and inspect native bridge bindings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schema and print its normalized interface
    Check {
        /// Path to a .bridge or .json schema
        schema: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate bindings for one target platform
    Generate {
        /// Path to a .bridge or .json schema
        schema: PathBuf,

        /// Target platform: web, android or ios (all when omitted)
        #[arg(long, short = 't')]
        target: Vec<Target>,

        /// Output directory
        #[arg(long, short = 'o', default_value = "generated")]
        out: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { schema, json } => check_command(&schema, json),
        Commands::Generate {
            schema,
            target,
            out,
        } => generate_command(&schema, &target, &out),
    }
}

fn load(path: &Path) -> anyhow::Result<Registry> {
    let schema = plugbridge::load_schema(path)?;
    Registry::new(schema).with_context(|| format!("Invalid schema {}", path.display()))
}

fn check_command(path: &Path, json: bool) -> anyhow::Result<()> {
    let registry = load(path)?;

    if json {
        let output = serde_json::json!({
            "schema": registry.schema(),
            "hash": registry.hash().to_hex(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("schema {} version {}", registry.name(), registry.version());
    println!("hash {}", registry.hash());

    if !registry.types().is_empty() {
        println!("types:");
        for typedef in registry.types() {
            print_typedef(typedef);
        }
    }

    let functions: Vec<&Function> = registry.functions().collect();
    if !functions.is_empty() {
        println!("functions:");
        for func in functions {
            println!("  {}", format_function(func));
        }
    }

    let objects: Vec<_> = registry.objects().collect();
    if !objects.is_empty() {
        println!("objects:");
        for object in objects {
            println!("  @{} {}", object.index.unwrap_or(0), object.name);
            if let Some(constructor) = &object.constructor {
                let throws = constructor
                    .throws
                    .as_ref()
                    .map(|e| format!(" throws {e}"))
                    .unwrap_or_default();
                println!("    constructor({}){throws}", format_params(&constructor.params));
            }
            for method in registry.methods(object.index.unwrap_or(0)) {
                println!("    {}", format_function(method));
            }
        }
    }

    Ok(())
}

fn generate_command(path: &Path, targets: &[Target], out: &Path) -> anyhow::Result<()> {
    let registry = load(path)?;
    let targets = if targets.is_empty() {
        Target::ALL.to_vec()
    } else {
        targets.to_vec()
    };

    for target in targets {
        let bindings = generate(&registry, target)?;
        let dir = out.join(target.name());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        for file in [&bindings.native, &bindings.host] {
            let dest = dir.join(&file.path);
            std::fs::write(&dest, &file.contents)
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            println!("wrote {}", dest.display());
        }
    }

    Ok(())
}

fn print_typedef(typedef: &TypeDef) {
    match typedef {
        TypeDef::Record { name, fields } => {
            let fields = fields
                .iter()
                .map(|f| format!("{}: {}", f.name, f.ty))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  record {name} {{ {fields} }}");
        }
        TypeDef::Enum { name, cases } => {
            let cases = cases
                .iter()
                .map(|c| match &c.payload {
                    Some(ty) => format!("{}({ty})", c.name),
                    None => c.name.clone(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!("  enum {name} {{ {cases} }}");
        }
        TypeDef::Alias { name, ty } => println!("  type {name} = {ty}"),
    }
}

fn format_function(func: &Function) -> String {
    let returns = func
        .returns
        .as_ref()
        .map(|ty: &Type| format!(" -> {ty}"))
        .unwrap_or_default();
    let throws = func
        .throws
        .as_ref()
        .map(|e| format!(" throws {e}"))
        .unwrap_or_default();
    format!(
        "@{} {}: func({}){returns}{throws}",
        func.index.unwrap_or(0),
        func.name,
        format_params(&func.params)
    )
}

fn format_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| format!("{}: {}", p.name, p.ty))
        .collect::<Vec<_>>()
        .join(", ")
}
