//! Chigraph command line.
//!
//! ```text
//! chi [-C <dir>] <COMMAND>
//!
//! Commands:
//!   compile    Compile a chigraph module to an LLVM module
//!   run        Compile and run a chigraph module's main function
//!   interpret  Interpret LLVM IR (similar to lli)
//!   get        Fetch a module and its dependencies into the workspace
//! ```
//!
//! Exit code is 0 on success and 1 on any error; diagnostics print to
//! stderr with their code and indented JSON context.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use inkwell::execution_engine::ExecutionEngine;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use inkwell::OptimizationLevel;
use tracing_subscriber::EnvFilter;

use chigraph::diagnostics::Diagnostics;
use chigraph::mangle::mangle_function_name;
use chigraph::{CompileSettings, Context};

/// The chigraph command line
#[derive(Parser)]
#[command(name = "chi")]
#[command(version)]
#[command(about = "Compile and run chigraph modules", long_about = None)]
struct Cli {
    /// Directory to change to before doing anything
    #[arg(short = 'C', long = "change-dir", global = true, value_name = "DIR")]
    change_dir: Option<PathBuf>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a chigraph module to an LLVM module
    ///
    /// Prints textual IR to stdout, or writes IR/bitcode to the path given
    /// with -o.
    Compile(CompileArgs),

    /// Compile a chigraph module and run its main function
    Run(ModuleArgs),

    /// Interpret an LLVM IR or bitcode file (similar to lli)
    Interpret(InterpretArgs),

    /// Fetch a module (and dependencies) into the workspace
    Get(ModuleArgs),
}

#[derive(Args)]
struct ModuleArgs {
    /// Full name of the module, e.g. github.com/user/repo/main
    #[arg(value_name = "MODULE")]
    module: String,
}

#[derive(Args)]
struct CompileArgs {
    /// Full name of the module to compile
    #[arg(value_name = "MODULE")]
    module: String,

    /// Output file; prints to stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Emit bitcode instead of textual IR
    #[arg(long)]
    bitcode: bool,

    /// Do not link dependencies into the output
    #[arg(long)]
    no_link: bool,

    /// Bypass the artifact cache
    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct InterpretArgs {
    /// LLVM .ll or .bc file to run
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(dir) = &cli.change_dir {
        if let Err(e) = std::env::set_current_dir(dir) {
            eprintln!("chi: cannot change to `{}`: {}", dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let outcome = match cli.command {
        Commands::Compile(args) => compile(args),
        Commands::Run(args) => run(args),
        Commands::Interpret(args) => interpret(args),
        Commands::Get(args) => get(args),
    };

    match outcome {
        Ok(code) => code,
        Err(diags) => {
            eprint!("{diags}");
            ExitCode::FAILURE
        }
    }
}

fn load_context(module: &str) -> Result<Context, Diagnostics> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut ctx = Context::new(cwd);
    ctx.load_module(module).into_result()?;
    Ok(ctx)
}

fn compile(args: CompileArgs) -> Result<ExitCode, Diagnostics> {
    let ctx = load_context(&args.module)?;
    let settings = CompileSettings {
        use_cache: !args.no_cache,
        link_dependencies: !args.no_link,
        cancel: None,
    };
    let compiled = ctx.compile_module(&args.module, &settings)?;

    match &args.output {
        Some(path) if args.bitcode => {
            if !compiled.write_bitcode_to_path(path) {
                let mut res = Diagnostics::new();
                res.add_entry(
                    "EUKN",
                    "Failed to write bitcode file",
                    serde_json::json!({ "Path": path.display().to_string() }),
                );
                return Err(res);
            }
        }
        Some(path) => {
            let ir = compiled.print_to_string().to_string();
            fs::write(path, ir).map_err(|e| {
                let mut res = Diagnostics::new();
                res.add_entry(
                    "EUKN",
                    "Failed to write IR file",
                    serde_json::json!({
                        "Path": path.display().to_string(),
                        "Error": e.to_string(),
                    }),
                );
                res
            })?;
        }
        None => {
            print!("{}", compiled.print_to_string().to_string());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run(args: ModuleArgs) -> Result<ExitCode, Diagnostics> {
    let ctx = load_context(&args.module)?;
    let compiled = ctx.compile_module(&args.module, &CompileSettings::full())?;

    // Prefer the synthesized C main; fall back to the graph main directly.
    if compiled.get_function("main").is_some() {
        let code = run_function_as_main(&compiled, "main")?;
        return Ok(exit_code_from(code));
    }

    let mangled = mangle_function_name(&args.module, "main");
    if compiled.get_function(&mangled).is_some() {
        let code = run_graph_main(&compiled, &mangled)?;
        return Ok(exit_code_from(code));
    }

    let mut res = Diagnostics::new();
    res.add_entry(
        "EUKN",
        "Failed to find a main function in the module",
        serde_json::json!({ "Module Name": args.module }),
    );
    Err(res)
}

fn interpret(args: InterpretArgs) -> Result<ExitCode, Diagnostics> {
    let mut res = Diagnostics::new();

    let bytes = fs::read(&args.file).map_err(|e| {
        let mut r = Diagnostics::new();
        r.add_entry(
            "EUKN",
            "Failed to read input file",
            serde_json::json!({
                "Path": args.file.display().to_string(),
                "Error": e.to_string(),
            }),
        );
        r
    })?;

    let ctx = Context::new("");
    let llvm = ctx.llvm();
    let name = args.file.display().to_string();
    let buffer = MemoryBuffer::create_from_memory_range_copy(&bytes, &name);

    // Try bitcode first, then textual IR.
    let module = match Module::parse_bitcode_from_buffer(&buffer, llvm) {
        Ok(m) => m,
        Err(_) => {
            let buffer = MemoryBuffer::create_from_memory_range_copy(&bytes, &name);
            match llvm.create_module_from_ir(buffer) {
                Ok(m) => m,
                Err(e) => {
                    res.add_entry(
                        "EUKN",
                        "Input is neither LLVM bitcode nor textual IR",
                        serde_json::json!({ "Error": e.to_string() }),
                    );
                    return Err(res);
                }
            }
        }
    };

    let code = run_function_as_main(&module, "main")?;
    Ok(exit_code_from(code))
}

fn get(args: ModuleArgs) -> Result<ExitCode, Diagnostics> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut ctx = Context::new(cwd);
    if !ctx.has_workspace() {
        let mut res = Diagnostics::new();
        res.add_entry(
            "EUKN",
            "chi get requires a workspace (.chigraphworkspace marker not found)",
            serde_json::json!({}),
        );
        return Err(res);
    }
    ctx.load_module(&args.module).into_result()?;
    println!("fetched {}", args.module);
    Ok(ExitCode::SUCCESS)
}

fn create_engine<'ctx>(module: &Module<'ctx>) -> Result<ExecutionEngine<'ctx>, Diagnostics> {
    module
        .create_jit_execution_engine(OptimizationLevel::Default)
        .map_err(|e| {
            let mut res = Diagnostics::new();
            res.add_entry(
                "EINT",
                "Failed to create an LLVM execution engine",
                serde_json::json!({ "Error": e.to_string() }),
            );
            res
        })
}

fn run_function_as_main(module: &Module<'_>, name: &str) -> Result<i32, Diagnostics> {
    let engine = create_engine(module)?;
    let main = unsafe { engine.get_function::<unsafe extern "C" fn() -> i32>(name) };
    match main {
        Ok(f) => Ok(unsafe { f.call() }),
        Err(e) => {
            let mut res = Diagnostics::new();
            res.add_entry(
                "EUKN",
                "Failed to find main function in module",
                serde_json::json!({ "Function": name, "Error": e.to_string() }),
            );
            Err(res)
        }
    }
}

/// Call a graph `main` (`i32 (i32, i32*)`) directly and return its output.
fn run_graph_main(module: &Module<'_>, mangled: &str) -> Result<i32, Diagnostics> {
    let engine = create_engine(module)?;
    let f = unsafe {
        engine.get_function::<unsafe extern "C" fn(i32, *mut i32) -> i32>(mangled)
    };
    match f {
        Ok(f) => {
            let mut out: i32 = 0;
            unsafe { f.call(0, &mut out) };
            Ok(out)
        }
        Err(e) => {
            let mut res = Diagnostics::new();
            res.add_entry(
                "EUKN",
                "Failed to find graph main in module",
                serde_json::json!({ "Function": mangled, "Error": e.to_string() }),
            );
            Err(res)
        }
    }
}

fn exit_code_from(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}
