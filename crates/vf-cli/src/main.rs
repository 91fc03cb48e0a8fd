#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use clap::{Parser, Subcommand};
use vf_server::lockfile::ServerLockfile;

/// vf-cli -- administrative entry point for the Operation Execution Engine
/// (spec §6 "CLI surface"). Every subcommand reuses the same
/// `create_and_execute` RPC the HTTP front door exposes to clients; this
/// binary is a thin, scriptable wrapper around it.
#[derive(Parser)]
#[command(name = "vf", version, about)]
struct Cli {
    /// Base URL for the running vf-server (defaults to the discovered
    /// lockfile, then http://127.0.0.1:9090).
    #[arg(short = 'u', long, global = true)]
    server_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vf-server health (default when no subcommand is given).
    Status,

    /// Post any registered operation method to `create_and_execute`,
    /// exactly as a client would.
    CreateAndExecute {
        /// Acting user id.
        #[arg(short = 'U', long)]
        user_id: String,
        /// Acting device id.
        #[arg(short = 'D', long, default_value_t = 0)]
        device_id: u64,
        /// Operation method name (see `vf_engine::dispatch::KNOWN_METHODS`).
        #[arg(short = 'm', long)]
        method: String,
        /// JSON-encoded method arguments.
        #[arg(short = 'a', long, default_value = "{}")]
        args: String,
        /// Block until the operation (and any chain it spawns) completes.
        #[arg(short = 's', long, default_value_t = false)]
        synchronous: bool,
    },

    /// Trigger the Scheduler's broad orphan scan out of band.
    ScanOrphans,

    /// Terminate a user's account (sets the login tombstone).
    TerminateAccount {
        /// User id to terminate.
        #[arg(short = 'U', long)]
        user_id: String,
        /// Acting device id.
        #[arg(short = 'D', long, default_value_t = 0)]
        device_id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let server_url = cli.server_url.unwrap_or_else(|| {
        ServerLockfile::read_valid()
            .map(|lock| lock.url())
            .unwrap_or_else(|| {
                eprintln!("warning: no running vf-server found, trying http://127.0.0.1:9090");
                "http://127.0.0.1:9090".to_string()
            })
    });
    let server_url = server_url.trim_end_matches('/').to_string();

    match cli.command {
        None | Some(Commands::Status) => {
            commands::status::run(&server_url).await?;
        }
        Some(Commands::CreateAndExecute {
            user_id,
            device_id,
            method,
            args,
            synchronous,
        }) => {
            commands::create_and_execute::run(&server_url, &user_id, device_id, &method, &args, synchronous).await?;
        }
        Some(Commands::ScanOrphans) => {
            commands::scan_orphans::run(&server_url).await?;
        }
        Some(Commands::TerminateAccount { user_id, device_id }) => {
            commands::terminate_account::run(&server_url, &user_id, device_id).await?;
        }
    }

    Ok(())
}
