use clap::{Parser, Subcommand};
use orchestrate_relay::{commands, VERSION};
use std::net::IpAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestrate-relay")]
#[command(about = "Gateway relaying chat messages to agents behind an orchestration API")]
#[command(version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve {
        /// Address to listen on
        #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
        host: IpAddr,
        /// Port to listen on
        #[arg(long, env = "RELAY_PORT", default_value_t = 8000)]
        port: u16,
    },

    /// Send one message through a running gateway and print the reply
    Probe {
        /// Gateway base URL
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        base_url: String,
        /// Message for the agent
        #[arg(long)]
        query: String,
        /// Target agent
        #[arg(long)]
        agent_id: String,
        /// Continue an existing thread
        #[arg(long)]
        thread_id: Option<String>,
        /// Use the streaming endpoint instead of polling
        #[arg(long)]
        stream: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Serve { host, port } => {
            if let Err(e) = commands::serve::run(host, port) {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Probe {
            base_url,
            query,
            agent_id,
            thread_id,
            stream,
        } => {
            let args = commands::probe::ProbeArgs {
                base_url,
                query,
                agent_id,
                thread_id,
                stream,
            };
            if let Err(e) = commands::probe::run(args) {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}
