use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tetra::config::ProjectConfig;
use tetra::logging::init_logging;
use tetra::pipeline;
use tetra::render::{RenderOptions, render_image};
use tetra::vm::verify_tables;

#[derive(Parser)]
#[command(name = "tetra")]
#[command(about = "Assemble, optimize and run Tetra bytecode", long_about = None)]
struct Cli {
    /// Raise the log level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bytecode file
    Run {
        /// The bytecode file to run
        file: PathBuf,

        /// Optimize before running
        #[arg(long)]
        optimize: bool,

        /// Execution ceiling (defaults to tetra.toml, then 10000)
        #[arg(long)]
        max_instructions: Option<usize>,

        /// Write variable diffs for every step to stderr
        #[arg(long)]
        debug: bool,

        /// Print the final global variables as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assemble a file and print the disassembly
    Asm {
        file: PathBuf,
    },
    /// Optimize a file and print the result
    Opt {
        file: PathBuf,
    },
    /// Render a shader to a PPM image
    Render {
        /// The shader bytecode file
        file: PathBuf,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// Value bound to iTime
        #[arg(long)]
        time: Option<f64>,

        /// Worker threads (0 = one per core)
        #[arg(long)]
        threads: Option<usize>,

        /// Optimize before rendering
        #[arg(long)]
        optimize: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = verify_tables() {
        eprintln!("internal error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run {
            file,
            optimize,
            max_instructions,
            debug,
            json,
        } => run(&file, optimize, max_instructions, debug, json),
        Commands::Asm { file } => asm(&file),
        Commands::Opt { file } => opt(&file),
        Commands::Render {
            file,
            output,
            width,
            height,
            time,
            threads,
            optimize,
        } => {
            let overrides = RenderOverrides {
                width,
                height,
                time,
                threads,
            };
            render(&file, &output, overrides, optimize)
        }
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// `tetra.toml` next to the program, if any.
fn load_project(file: &Path) -> Result<ProjectConfig, String> {
    let dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    ProjectConfig::load(dir).map_err(|e| e.to_string())
}

fn run(file: &Path, optimize: bool, max_instructions: Option<usize>, debug: bool, json: bool) -> Result<(), String> {
    let mut config = load_project(file)?.runtime;
    config.optimize |= optimize;
    config.debug |= debug;
    if let Some(max) = max_instructions {
        config.max_instructions = max;
    }

    let outcome = pipeline::run_file(file, &config, Box::new(io::stdout())).map_err(|e| e.to_string())?;

    if json {
        let text = serde_json::to_string_pretty(&outcome).map_err(|e| e.to_string())?;
        println!("{}", text);
    }
    Ok(())
}

fn asm(file: &Path) -> Result<(), String> {
    let (program, _) = pipeline::compile_file(file, false).map_err(|e| e.to_string())?;
    print!("{}", program.dump());
    Ok(())
}

fn opt(file: &Path) -> Result<(), String> {
    let (program, stats) = pipeline::compile_file(file, true).map_err(|e| e.to_string())?;
    print!("{}", program.dump());
    if let Some(stats) = stats {
        eprintln!("{}", stats);
    }
    Ok(())
}

struct RenderOverrides {
    width: Option<u32>,
    height: Option<u32>,
    time: Option<f64>,
    threads: Option<usize>,
}

fn render(file: &Path, output: &Path, overrides: RenderOverrides, optimize: bool) -> Result<(), String> {
    let project = load_project(file)?;
    let mut settings = project.render;
    settings.width = overrides.width.unwrap_or(settings.width);
    settings.height = overrides.height.unwrap_or(settings.height);
    settings.time = overrides.time.unwrap_or(settings.time);
    settings.threads = overrides.threads.unwrap_or(settings.threads);

    let optimize = optimize || project.runtime.optimize;
    let (program, _) = pipeline::compile_file(file, optimize).map_err(|e| e.to_string())?;

    let options = RenderOptions::new(&settings, &project.runtime);
    let image = render_image(&program, &options).map_err(|e| e.to_string())?;
    image.write_ppm(output).map_err(|e| e.to_string())?;

    if image.failed > 0 {
        eprintln!("warning: {} of {} pixels failed", image.failed, u64::from(settings.width) * u64::from(settings.height));
    }
    Ok(())
}
