// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Whatever};

mod build_info;
use spool_app::AppConfig;
use spool_common_telemetry::{logging, panic_hook};

#[derive(Debug, Parser)]
#[clap(
name = "spool",
about = "Buffer records and persist them in batches to time-partitioned append-only storage",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Run(RunArgs),
    ShowConfig(ShowConfigArgs),
    Version,
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Reads records from the configured source and flushes them to storage until
interrupted. On SIGINT or SIGTERM every buffered record is written before exit.
Examples:

spool run
spool run --config /etc/spool/spool.toml
SPOOL__SOURCE__KIND=tcp spool run

")]
struct RunArgs {
    /// Configuration file layered over the built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl RunArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let config = AppConfig::load(self.config.as_deref())?;
        let _guards = logging::init_global_logging("spool", &config.logging);
        panic_hook::set_panic_hook();

        config.open().run().await
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Prints the effective configuration after all layers are applied.
Examples:

spool show-config
spool show-config --config ./spool.toml

")]
struct ShowConfigArgs {
    /// Configuration file layered over the built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ShowConfigArgs {
    #[allow(clippy::print_stdout)]
    fn run(&self) -> Result<(), Whatever> {
        let config = AppConfig::load(self.config.as_deref())?;
        let rendered =
            serde_json::to_string_pretty(&config).whatever_context("Failed to render config")?;
        println!("{rendered}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Run(args) => args.run().await,
        Commands::ShowConfig(args) => args.run(),
        Commands::Version => {
            println!("{}", build_info::BUILD_SUMMARY);
            Ok(())
        }
    }
}
