use clap::Parser;
use log::{error, info};
use server::config::{PureMode, ServerConfig};
use server::game::BaselineGame;
use server::network::Server;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Main-method of the application.
/// Parses command-line arguments, builds the server configuration and runs
/// the main loop until ctrl-c or a "quit" console command.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "27960")]
        port: u16,
        /// Maximum number of clients
        #[clap(short, long, default_value = "20")]
        max_clients: usize,
        /// Server name shown in browsers
        #[clap(long, default_value = "Rust Game Server")]
        hostname: String,
        /// Pak validation: off, lenient or strict
        #[clap(long, default_value = "off")]
        pure: String,
        /// Remote console password (rcon disabled when empty)
        #[clap(long, default_value = "")]
        rcon_password: String,
        /// Map to load on startup
        #[clap(long)]
        map: Option<String>,
    }

    // Parse command line arguments
    let args = Args::parse();

    let config = ServerConfig {
        hostname: args.hostname,
        max_clients: args.max_clients,
        pure_mode: match args.pure.as_str() {
            "strict" => PureMode::Strict,
            "lenient" => PureMode::Lenient,
            _ => PureMode::Off,
        },
        rcon_password: args.rcon_password,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let game = Box::new(BaselineGame::new(config.max_clients));
    let mut server = Server::new(&address, config, game).await?;

    // Feed stdin lines into the operator console
    let console = server.console_sender();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if console.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading console input: {}", e);
                    break;
                }
            }
        }
    });

    if let Some(map) = args.map {
        let console = server.console_sender();
        let _ = console.send(format!("map {}", map));
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
