use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use soshost_core::loader::SosLibrary;
use soshost_core::{HostConfig, HostError, SosHost};
use soshost_utils::{info, init_logging_with, warn, LogLevel, LogOptions};

/// Runs SOS debugger extension commands against a live .NET process.
#[derive(Parser, Debug)]
#[command(name = "soshost")]
#[command(version)]
#[command(about = "Runs SOS debugger extension commands against a live .NET process", long_about = None)]
struct Cli
{
    /// Directory containing the SOS module (overrides SOSHOST_SOS_DIR)
    #[arg(long, global = true)]
    sos_dir: Option<PathBuf>,
    /// Read a point-in-time snapshot clone instead of the live process (Windows)
    #[arg(long, global = true, default_value_t = false)]
    snapshot: bool,
    /// Keep every thread of the target suspended while attached
    #[arg(long, global = true, default_value_t = false)]
    suspend: bool,
    /// Symbol path applied once SOS is loaded (e.g. "srv*")
    #[arg(long, global = true)]
    symbol_path: Option<String>,
    /// Log level (error, warn, info, debug, trace); defaults to RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Attach to a running process by PID and run SOS commands
    ///
    /// Without a command, commands are read from stdin one per line until
    /// `exit` or `quit`.
    Attach
    {
        /// Process ID (PID) to attach to
        pid: u32,
        /// SOS command and its arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the documentation of an SOS command
    Help
    {
        /// Command name
        command: String,
    },
}

fn main()
{
    let cli = Cli::parse();

    let mut options = LogOptions::from_env();
    options.level = cli.log_level;
    let _logging = match init_logging_with(&options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn host_config(cli: &Cli) -> HostConfig
{
    let mut config = HostConfig::from_env();
    if let Some(dir) = &cli.sos_dir {
        config = config.with_sos_directory(dir);
    }
    if cli.snapshot {
        config = config.with_snapshot(true);
    }
    if cli.suspend {
        config = config.with_suspend(true);
    }
    if let Some(path) = &cli.symbol_path {
        config = config.with_symbol_path(path);
    }
    config
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    let config = host_config(&cli);
    match cli.command {
        Commands::Attach { pid, command } => {
            info!("Attaching to process {}", pid);
            let mut host = SosHost::attach(pid, &config)?;

            let interrupt = host.interrupt_token();
            if let Err(e) = ctrlc::set_handler(move || interrupt.request()) {
                warn!(error = %e, "Ctrl+C will not interrupt commands");
            }

            if command.is_empty() {
                run_interactive(&mut host)?;
            } else {
                host.execute_command(Some(&command.join(" ")))?;
            }
            Ok(())
        }
        Commands::Help { command } => {
            let library = SosLibrary::new(config.sos_directory());
            println!("{}", library.help_text(&command)?);
            Ok(())
        }
    }
}

/// Read commands from stdin until `exit`, `quit` or end of input
///
/// A failing command is reported and the loop continues.
fn run_interactive(host: &mut SosHost) -> io::Result<()>
{
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("sos> ");
        io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            return Ok(());
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => return Ok(()),
            _ => {}
        }
        match host.execute_command(Some(line)) {
            Ok(()) => {}
            Err(HostError::EntryPointNotFound(command) | HostError::CommandNotFound(command)) => {
                eprintln!("Unrecognized SOS command '{}'", command);
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}
