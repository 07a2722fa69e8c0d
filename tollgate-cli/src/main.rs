//! Tollgate CLI
//!
//! Command-line access to OAuth2-protected data APIs configured in
//! `config.toml`.
//!
//! # Usage
//!
//! ```bash
//! # Fetch (or reuse) a token for an integration
//! tollgate token fannie-mae
//!
//! # Census-tract income limits
//! tollgate income-limits --fips 51059
//!
//! # Authorize a PKCE integration, then use it
//! tollgate authorize spotify
//! tollgate spotify-playlists --all
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod config;

use commands::{Context, PoolPrefixArgs};

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "Authenticated access to OAuth2-protected data APIs")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain a valid access token, reusing a cached one when possible
    Token {
        /// Integration name from the config file
        integration: String,

        /// Print the raw token value
        #[arg(long)]
        show: bool,
    },

    /// Issue an authenticated GET and print the JSON response
    Get {
        /// Integration name
        integration: String,

        /// Path relative to the integration's base URL, or an absolute URL
        path: String,

        /// Query parameters as key=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,
    },

    /// Run the PKCE authorization flow and store the resulting tokens
    Authorize {
        /// Integration name
        integration: String,

        /// Loopback port for the redirect (defaults to the redirect URI's port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Forget cached and stored tokens for an integration
    Logout {
        /// Integration name
        integration: String,
    },

    /// Fannie Mae income limits by census tract or address
    IncomeLimits {
        /// Census tract FIPS code
        #[arg(long, conflicts_with = "address")]
        fips: Option<String>,

        /// Street address: NUMBER STREET CITY STATE ZIP
        #[arg(long, num_args = 5, value_names = ["NUMBER", "STREET", "CITY", "STATE", "ZIP"])]
        address: Option<Vec<String>>,

        #[arg(short, long, default_value = "fannie-mae")]
        integration: String,
    },

    /// Fannie Mae MBS pool prefixes
    PoolPrefix {
        #[arg(long)]
        business_line: Option<String>,

        #[arg(long)]
        amortization_type: Option<String>,

        #[arg(long)]
        prefix: Option<String>,

        /// Search descriptions instead of filtering
        #[arg(long, conflicts_with_all = ["business_line", "amortization_type", "prefix"])]
        keyword: Option<String>,

        /// BUSINESS_LINE[:AMORTIZATION_TYPE] lookups in one request (repeatable)
        #[arg(long, conflicts_with = "keyword")]
        multiple: Vec<String>,

        #[arg(short, long, default_value = "fannie-mae")]
        integration: String,
    },

    /// Spotify profile of the authorized user
    SpotifyProfile {
        #[arg(short, long, default_value = "spotify")]
        integration: String,
    },

    /// Spotify playlists of the authorized user
    SpotifyPlaylists {
        /// Follow paging links and print every playlist
        #[arg(long)]
        all: bool,

        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,

        #[arg(short, long, default_value = "spotify")]
        integration: String,
    },

    /// Search the Spotify catalog
    SpotifySearch {
        query: String,

        /// Comma-separated item types (track, artist, album, playlist)
        #[arg(short = 't', long = "type", default_value = "track")]
        types: String,

        #[arg(long, default_value_t = 10)]
        limit: u32,

        #[arg(short, long, default_value = "spotify")]
        integration: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);
    debug!("Loaded configuration from {:?}", config.config_path);

    let ctx = Context::new(config);

    match cli.command {
        Commands::Token { integration, show } => {
            commands::token(&ctx, &integration, show).await
        }
        Commands::Get { integration, path, query } => {
            commands::get(&ctx, &integration, &path, &query).await
        }
        Commands::Authorize { integration, port } => {
            commands::authorize(&ctx, &integration, port).await
        }
        Commands::Logout { integration } => {
            commands::logout(&ctx, &integration).await
        }
        Commands::IncomeLimits { fips, address, integration } => {
            commands::income_limits(&ctx, &integration, fips.as_deref(), address.as_deref()).await
        }
        Commands::PoolPrefix {
            business_line,
            amortization_type,
            prefix,
            keyword,
            multiple,
            integration,
        } => {
            let args = PoolPrefixArgs {
                business_line,
                amortization_type,
                prefix,
                keyword: keyword.as_deref(),
                multiple: &multiple,
            };
            commands::pool_prefix(&ctx, &integration, args).await
        }
        Commands::SpotifyProfile { integration } => {
            commands::spotify_profile(&ctx, &integration).await
        }
        Commands::SpotifyPlaylists { all, limit, offset, integration } => {
            commands::spotify_playlists(&ctx, &integration, all, limit, offset).await
        }
        Commands::SpotifySearch { query, types, limit, integration } => {
            commands::spotify_search(&ctx, &integration, &query, &types, limit).await
        }
    }
}

/// `--verbose` forces debug; otherwise `RUST_LOG` wins over the config file.
fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
