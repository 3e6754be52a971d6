// tacc: compile a tiny C subset and run it in-process

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tacc::snapshot::Trace;
use tacc::ui::App;
use tacc::{Backend, Engine, EngineConfig};

/// Snapshot history budget for the inspector (1 GB)
const SNAPSHOT_LIMIT: usize = 1024 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "tacc", about = "Tiny single-pass C compiler", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// C source file
    input: PathBuf,

    /// Arguments passed to main after the program name
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Write the generated code to FILE instead of running it
    #[arg(short = 'o', long = "dump", value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Print a listing of the generated code instead of running it
    #[arg(short = 'S', long)]
    listing: bool,

    /// Code generator: native or bytecode
    #[arg(short, long, env = "TACC_BACKEND")]
    backend: Option<Backend>,

    /// Step through execution in a terminal UI (uses the bytecode backend)
    #[arg(long)]
    inspect: bool,

    #[arg(long, env = "TACC_CODE_CAPACITY", value_name = "BYTES")]
    code_capacity: Option<usize>,

    #[arg(long, env = "TACC_DATA_CAPACITY", value_name = "BYTES")]
    data_capacity: Option<usize>,

    #[arg(long, env = "TACC_MAX_SYMBOLS", value_name = "N")]
    max_symbols: Option<usize>,

    /// Abort the bytecode VM after N instructions
    #[arg(long, env = "TACC_STEP_LIMIT", value_name = "N")]
    step_limit: Option<u64>,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().with_step_limit(self.step_limit);
        if let Some(backend) = self.backend {
            config = config.with_backend(backend);
        }
        if let Some(bytes) = self.code_capacity {
            config = config.with_code_capacity(bytes);
        }
        if let Some(bytes) = self.data_capacity {
            config = config.with_data_capacity(bytes);
        }
        if let Some(count) = self.max_symbols {
            config = config.with_max_symbols(count);
        }
        if self.inspect {
            if config.backend != Backend::Bytecode {
                tracing::info!("inspector runs the bytecode backend");
            }
            config = config.with_backend(Backend::Bytecode);
        }
        config
    }

    /// `argv` as the program sees it.
    fn argv(&self) -> Vec<String> {
        std::iter::once(self.input.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .without_time(),
        )
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", cli.input.display(), e);
            process::exit(1);
        }
    };

    let mut engine = Engine::new(cli.config());
    if let Err(e) = engine.compile(&source) {
        eprintln!("{}: {}", cli.input.display(), e);
        process::exit(1);
    }

    if cli.listing || cli.dump.is_some() {
        if cli.listing {
            engine.listing(&mut io::stdout().lock())?;
        }
        if let Some(path) = &cli.dump {
            let mut file = fs::File::create(path)?;
            engine.dump(&mut file)?;
        }
        return Ok(());
    }

    if cli.inspect {
        return inspect(&engine, source, &cli.argv());
    }

    match engine.run(&cli.argv()) {
        Ok(code) => {
            io::stdout().flush()?;
            process::exit(code);
        }
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    }
}

fn inspect(engine: &Engine, source: String, argv: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let Some(program) = engine.program() else {
        return Err(tacc::RuntimeError::NotCompiled.into());
    };
    eprintln!("Recording execution...");
    let trace = Trace::record(program, engine.vm(argv)?, SNAPSHOT_LIMIT);
    eprintln!("Total snapshots: {}", trace.len());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(trace, source, program);
    let res = app.run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("Error: {:?}", err);
    }
    Ok(())
}
