use anyhow::Result;
use clap::{Parser, Subcommand};
use facegate_core::store;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod config;
mod session;

use config::Config;
use session::LoginOutcome;

#[derive(Parser)]
#[command(name = "facegate", about = "Webcam face registration and login")]
struct Cli {
    /// Emit machine-readable JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture webcam photos and register a user
    Register {
        username: String,
        /// Replace an existing registration
        #[arg(long)]
        overwrite: bool,
    },
    /// Recognize the named user from the webcam
    Login { username: String },
    /// Watch the webcam and report every recognized team member
    Recognize {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// List registered users
    List,
    /// Remove a registered user and their photos
    Remove { username: String },
    /// Run camera and photo-store diagnostics
    Test,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load();
    let quit = session::install_quit_signal()?;

    match cli.command {
        Commands::Register { username, overwrite } => {
            session::run_register(&cfg, &username, overwrite, &quit)?;
        }
        Commands::Login { username } => {
            let outcome = session::run_login(&cfg, &username, &quit)?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "user": username,
                        "recognized": outcome == LoginOutcome::Recognized,
                        "cancelled": outcome == LoginOutcome::Cancelled,
                    })
                );
            } else {
                match outcome {
                    LoginOutcome::Recognized => println!("Welcome, {username}!"),
                    LoginOutcome::NotRecognized => {
                        println!("User not recognized. Please register or try again.")
                    }
                    LoginOutcome::Cancelled => println!("Login cancelled."),
                }
            }
            if outcome != LoginOutcome::Recognized {
                std::process::exit(1);
            }
        }
        Commands::Recognize { duration_secs } => {
            let members = session::run_team_recognition(&cfg, duration_secs, &quit)?;
            if cli.json {
                println!("{}", json!({ "recognized": members }));
            } else if members.is_empty() {
                println!("No team members were recognized.");
            } else {
                println!(
                    "Recognized members: {}",
                    members.into_iter().collect::<Vec<_>>().join(", ")
                );
            }
        }
        Commands::List => {
            let users = store::list_users(&cfg.faces_dir)?;
            if cli.json {
                println!("{}", json!({ "users": users }));
            } else if users.is_empty() {
                println!("No users registered.");
            } else {
                for user in users {
                    println!("{user}");
                }
            }
        }
        Commands::Remove { username } => {
            store::remove_user(&cfg.faces_dir, &username)?;
            println!("Removed '{username}'.");
        }
        Commands::Test => {
            session::run_test(&cfg)?;
        }
    }

    Ok(())
}
