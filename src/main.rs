//! CLI entry point (§6 "External interfaces").
//!
//! `mes-engine` with no arguments locates and runs the boot file;
//! `-e`/`--eval` runs one expression through the minimal reader
//! instead. Arguments after `--` are exposed to Scheme as `%argv`.

use clap::Parser;
use mes_engine::bootstrap;
use mes_engine::config::Config;
use mes_engine::eval::Engine;
use mes_engine::printer;
use mes_engine::reader;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// `mes-engine [OPTIONS] [SCRIPT] [-- ARGS...]`
#[derive(Parser, Debug)]
#[command(name = "mes-engine", version, about = "A minimal, bootstrappable Scheme evaluator")]
struct Cli {
    /// Boot/script file to run instead of the MES_BOOT search path.
    script: Option<String>,

    /// Evaluate EXPR (via the minimal reader) instead of a boot file.
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Override the boot file path (else MES_BOOT/search path).
    #[arg(long = "boot")]
    boot: Option<String>,

    /// Print the interned symbol table before running (MES_DEBUG=4 equivalent).
    #[arg(long = "dump-symbols")]
    dump_symbols: bool,

    /// Raise MES_DEBUG-equivalent trace verbosity (repeatable, 0..5).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments after `--`, exposed to Scheme as `%argv`.
    #[arg(last = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if cli.verbose > 0 {
        config.debug = config.debug.max(cli.verbose).min(5);
    }
    if let Some(boot) = &cli.boot {
        config.boot = boot.clone();
        config.prefix = None; // an explicit --boot path bypasses the search path entirely
    }

    let filter = EnvFilter::new(config.trace_filter());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut engine = match Engine::new(config.clone()) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("mes-engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bootstrap::init_specials(&mut engine) {
        eprintln!("mes-engine: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = bootstrap::register_builtins(&mut engine) {
        eprintln!("mes-engine: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = bootstrap::bind_argv(&mut engine, &cli.args) {
        eprintln!("mes-engine: {e}");
        return ExitCode::FAILURE;
    }

    if cli.dump_symbols || config.debug >= 4 {
        for name in engine.symbols.names() {
            println!("{name}");
        }
    }
    if config.debug >= 5 {
        println!("{}", printer::write_value(&engine, engine.module));
    }

    let result = if let Some(expr) = &cli.eval {
        run_eval(&mut engine, expr)
    } else {
        run_boot(&mut engine, &cli, &config)
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mes-engine: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_eval(engine: &mut Engine, expr: &str) -> mes_engine::EngineResult<()> {
    let form = reader::read_one(engine, expr)?;
    let module = engine.module;
    let value = engine.eval_top(form, module)?;
    println!("{}", printer::write_value(engine, value));
    Ok(())
}

fn run_boot(engine: &mut Engine, cli: &Cli, config: &Config) -> mes_engine::EngineResult<()> {
    let text = if let Some(script) = &cli.script {
        std::fs::read_to_string(script).map_err(|_| mes_engine::EngineError::BootFileNotFound {
            searched: vec![script.clone()],
        })?
    } else {
        bootstrap::locate_boot_file(config)?
    };
    bootstrap::run_boot_text(engine, &text)?;
    Ok(())
}
