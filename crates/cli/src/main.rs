//! Cosmo command-line driver: run scripts, start a REPL, or emit shell
//! completions (`spec.md` §5), dispatched through a `clap::Subcommand` the
//! way a `seqc`-style compiler CLI lays out its own subcommands.

mod config;
mod repl;
mod run;

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

#[derive(Parser)]
#[command(name = "cosmo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cosmo language interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a Cosmo source file
    Run {
        /// Input .cosmo source file
        path: PathBuf,

        /// Name used for error messages and stack traces
        #[arg(long, default_value = "<script>")]
        module_name: String,
    },

    /// Start an interactive line-editing REPL
    Repl,

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { path, module_name } => run::run(&path, &module_name),
        Commands::Repl => repl::run(),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "cosmo", &mut io::stdout());
        }
    }
}
