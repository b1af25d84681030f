//! atc24: live ATC 24 clearance feed with a feed client, query API, and CLI.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use atc_core::clearance::{make_clearance, validate_runway};
use atc_core::config::{self, Config};
use atc_core::store::{FlightView, StateStore};
use atc_core::types::FlightPlan;

mod feed;
mod web;

use feed::{FeedClient, FeedStats, WsConnector};
use web::AppState;

#[derive(Parser)]
#[command(name = "atc24", version, about = "ATC 24 live clearance feed")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the live feed and serve the query API
    Serve {
        /// Bind address (default from config)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default from config)
        #[arg(long)]
        port: Option<u16>,

        /// Upstream WebSocket endpoint
        #[arg(long, env = "ATC24_FEED_URL")]
        feed_url: Option<String>,
    },

    /// Render a clearance locally without a server
    Clearance {
        #[arg(long)]
        callsign: String,

        #[arg(long)]
        departing: String,

        #[arg(long)]
        arriving: String,

        /// Flight level in hundreds of feet (e.g. 040)
        #[arg(long)]
        flight_level: String,

        #[arg(long, default_value = "N/A")]
        aircraft: String,

        /// Departure runway (e.g. 09L)
        #[arg(long)]
        runway: Option<String>,
    },

    /// Show recent flights from a running server
    Flights {
        /// Server base URL (default from config)
        #[arg(long)]
        server: Option<String>,

        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Show feed connection status from a running server
    Status {
        /// Server base URL (default from config)
        #[arg(long)]
        server: Option<String>,
    },

    /// Manage ~/.atc24/config.yaml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = config::load_config();

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            feed_url,
        } => cmd_serve(&config, host, port, feed_url).await,
        Commands::Clearance {
            callsign,
            departing,
            arriving,
            flight_level,
            aircraft,
            runway,
        } => {
            let plan = FlightPlan {
                callsign: Some(callsign),
                aircraft: Some(aircraft),
                departing: Some(departing),
                arriving: Some(arriving),
                flightlevel: Some(Value::String(flight_level)),
                ..Default::default()
            };
            cmd_clearance(&plan, runway.as_deref());
        }
        Commands::Flights { server, limit } => {
            cmd_flights(&server_url(&config, server), limit).await
        }
        Commands::Status { server } => cmd_status(&server_url(&config, server)).await,
        Commands::Config { action } => cmd_config(&config, action),
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error {context}: {err}");
    std::process::exit(1);
}

fn server_url(config: &Config, server: Option<String>) -> String {
    server
        .unwrap_or_else(|| format!("http://{}:{}", config.dashboard.host, config.dashboard.port))
        .trim_end_matches('/')
        .to_string()
}

async fn cmd_serve(
    config: &Config,
    host: Option<String>,
    port: Option<u16>,
    feed_url: Option<String>,
) {
    let feed_url = feed_url.unwrap_or_else(|| config.feed.url.clone());
    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.dashboard.host.clone()),
        port.unwrap_or(config.dashboard.port)
    );

    let store = Arc::new(StateStore::new());
    let stats = Arc::new(FeedStats::default());

    tracing::info!("Feed endpoint: {feed_url}");
    let client = FeedClient::new(
        WsConnector::new(&feed_url),
        Arc::clone(&store),
        Arc::clone(&stats),
    );
    let feed_task = tokio::spawn(client.run());

    let state = Arc::new(AppState {
        store,
        stats,
        feed_url,
    });
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl+C, shutting down...");
    };

    if let Err(e) = web::serve(state, &addr, shutdown).await {
        fail(&format!("serving on {addr}"), e);
    }
    feed_task.abort();
}

fn cmd_clearance(plan: &FlightPlan, runway: Option<&str>) {
    let runway = runway.map(|r| validate_runway(r).unwrap_or_else(|e| fail("in runway", e)));
    let clearance =
        make_clearance(plan, runway.as_deref()).unwrap_or_else(|e| fail("in flight plan", e));

    println!();
    print!("{}", clearance.text);
    println!();
    println!("Squawk: {}", clearance.squawk);
}

async fn fetch_json<T: serde::de::DeserializeOwned>(url: &str) -> T {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .unwrap_or_else(|e| fail(&format!("fetching {url}"), e));
    response
        .json::<T>()
        .await
        .unwrap_or_else(|e| fail(&format!("decoding {url}"), e))
}

fn clock(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S")
        .to_string()
}

async fn cmd_flights(server: &str, limit: usize) {
    let flights: Vec<FlightView> = fetch_json(&format!("{server}/api/flights?limit={limit}")).await;

    println!();
    println!("{} flights", flights.len());
    println!();

    if flights.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Time", "Callsign", "Aircraft", "From", "To", "FL", "Squawk", "Dist dep", "Dist arr",
    ]);

    for f in &flights {
        let callsign = if f.arriving_at_filter {
            format!("{} (inbound)", f.callsign)
        } else {
            f.callsign.clone()
        };
        table.add_row(vec![
            Cell::new(clock(&f.timestamp)),
            Cell::new(callsign),
            Cell::new(&f.aircraft_type),
            Cell::new(&f.departure_airport),
            Cell::new(&f.arrival_airport),
            Cell::new(format!("{:03}", f.flight_level)),
            Cell::new(&f.squawk),
            Cell::new(
                f.distance_to_departure
                    .map(|d| format!("{d:.0}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                f.distance_to_arrival
                    .map(|d| format!("{d:.0}"))
                    .unwrap_or("-".into()),
            ),
        ]);
    }

    println!("{table}");
}

async fn cmd_status(server: &str) {
    let status: Value = fetch_json(&format!("{server}/api/status")).await;

    println!();
    println!("Feed:     {}", status["feed_url"].as_str().unwrap_or("-"));
    println!("Status:   {}", status["status"].as_str().unwrap_or("-"));
    println!("Flights:  {}", status["history"]);
    println!(
        "Filter:   {}",
        status["filter"].as_str().unwrap_or("(none)")
    );
    let stats = &status["stats"];
    println!(
        "Messages: {} ({} flight plans, {} aircraft updates, {} dropped)",
        stats["messages"], stats["flight_plans"], stats["aircraft_updates"], stats["decode_errors"]
    );
    println!();

    let Some(log) = status["log"].as_array().filter(|l| !l.is_empty()) else {
        return;
    };

    let mut table = Table::new();
    table.set_header(vec!["Time", "Status", "Message"]);
    for entry in log {
        let time = entry["timestamp"]
            .as_str()
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| clock(&t.with_timezone(&chrono::Utc)))
            .unwrap_or("-".into());
        table.add_row(vec![
            Cell::new(time),
            Cell::new(entry["status"].as_str().unwrap_or("-")),
            Cell::new(entry["message"].as_str().unwrap_or("")),
        ]);
    }
    println!("{table}");
}

fn cmd_config(config: &Config, action: ConfigAction) {
    match action {
        ConfigAction::Init { force } => {
            let path = config::config_file();
            if path.exists() && !force {
                fail(
                    "writing config",
                    format!("{} already exists (use --force)", path.display()),
                );
            }
            match config::save_config(&Config::default()) {
                Ok(path) => println!("Wrote {}", path.display()),
                Err(e) => fail("writing config", e),
            }
        }
        ConfigAction::Show => {
            println!("# {}", config::config_file().display());
            print!("{}", config::serialize_config(config));
        }
    }
}
