//! Pipeline command handlers
//!
//! Read-only views of the definition directory. None of these talk to the
//! workflow service.

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use stepdeck_core::domain::pipeline::{ParameterKind, PipelineConfig};

use crate::console::Console;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// List loaded pipelines
    List {
        /// Only pipelines deployed to this environment
        #[arg(short, long)]
        env: Option<String>,
    },
    /// Show a pipeline's parameters and deployments
    Show {
        /// Pipeline name
        name: String,
    },
    /// Validate every definition file and report problems
    Check,
}

pub fn handle_pipeline_command(command: PipelineCommands, console: &Console) -> Result<()> {
    match command {
        PipelineCommands::List { env } => list_pipelines(console, env.as_deref()),
        PipelineCommands::Show { name } => show_pipeline(console, &name),
        PipelineCommands::Check => check_definitions(console),
    }
}

fn list_pipelines(console: &Console, environment: Option<&str>) -> Result<()> {
    let store = console.catalog()?;
    let catalog = store.current();

    let pipelines: Vec<_> = match environment {
        Some(env) => {
            console.require_environment(env)?;
            catalog.for_environment(env).collect()
        }
        None => catalog.pipelines().collect(),
    };

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} pipeline(s):", pipelines.len()).bold()
    );
    println!();
    for pipeline in pipelines {
        println!("  {} {}", "▸".cyan(), pipeline.name.bold());
        println!("    Name:         {}", pipeline.display_name.dimmed());
        println!(
            "    Environments: {}",
            pipeline
                .environments
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
                .dimmed()
        );
        println!();
    }

    if !catalog.errors().is_empty() {
        println!(
            "{}",
            format!(
                "{} definition(s) skipped; run `stepdeck pipelines check` for details",
                catalog.errors().len()
            )
            .yellow()
        );
    }
    Ok(())
}

fn show_pipeline(console: &Console, name: &str) -> Result<()> {
    let store = console.catalog()?;
    let catalog = store.current();
    let Some(pipeline) = catalog.pipeline(name) else {
        bail!("Unknown pipeline '{}'", name);
    };

    print_pipeline_details(pipeline);
    Ok(())
}

fn check_definitions(console: &Console) -> Result<()> {
    let store = console.catalog()?;
    let catalog = store.current();

    for pipeline in catalog.pipelines() {
        println!("{} {}", "✓".green(), pipeline.name);
    }
    for error in catalog.errors() {
        println!("{} {}", "✗".red(), error);
    }

    if !catalog.errors().is_empty() {
        bail!("{} definition(s) failed to load", catalog.errors().len());
    }
    println!(
        "{}",
        format!("All {} definition(s) are valid", catalog.len())
            .green()
            .bold()
    );
    Ok(())
}

fn print_pipeline_details(pipeline: &PipelineConfig) {
    println!("{}", "Pipeline Details:".bold());
    println!("  Name:         {}", pipeline.name.cyan());
    println!("  Display name: {}", pipeline.display_name.bold());
    println!("  Output:       {}", pipeline.files.output_directory);

    println!("\n{}", "Environments:".bold());
    for environment in pipeline.environments() {
        println!("  {:<12} {}", environment.name, environment.target.dimmed());
    }

    println!("\n{}", "Parameters:".bold());
    if pipeline.parameters.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for parameter in &pipeline.parameters {
        let required = if parameter.optional { "" } else { "*" };
        println!(
            "  - {}{}: {} {}",
            parameter.name.cyan(),
            required.red(),
            parameter.kind.type_name().dimmed(),
            format!("({})", parameter.description).dimmed()
        );
        if let ParameterKind::Select {
            options, multiple, ..
        } = &parameter.kind
        {
            let arity = if *multiple { "any of" } else { "one of" };
            println!("      {} {}", arity, options.join(", "));
        }
        if let Some(default) = parameter.kind.default_value() {
            println!("      default {}", default);
        }
    }
}
