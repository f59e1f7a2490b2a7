use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use letting_desk::{
    config::AppConfig, create_session, create_user, db, find_user_by_email, import_properties,
    load_properties_csv, set_user_role, telemetry, PropertyStatus, Role,
};

/// Letting Desk administration CLI
#[derive(Parser)]
#[command(name = "letting-desk", version, about)]
struct Cli {
    /// Config file (defaults to ./letting-desk.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and schema
    Init,

    /// Import draft properties from CSV
    Import {
        csv: PathBuf,
    },

    /// Create a user
    AddUser {
        email: String,
        name: String,
        /// ADMIN, TENANT, LANDLORD, AGENT, APPLICANT, TRADESPERSON or ACCOUNTANT
        #[arg(long)]
        role: Option<Role>,
    },

    /// Change a user's role ("none" clears it)
    SetRole {
        email: String,
        role: String,
    },

    /// Start a session for a user and print its cookie token.
    /// This is how users sign in unless `auth.dev_login` is enabled.
    Login {
        email: String,
    },

    /// Print the property status transition table
    Transitions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(Some(path.as_path()))?,
        None => AppConfig::load()?,
    };
    telemetry::init_logging(&config.logging)?;

    match cli.command {
        Command::Init => run_init(&config),
        Command::Import { csv } => run_import(&config, &csv),
        Command::AddUser { email, name, role } => run_add_user(&config, &email, &name, role),
        Command::SetRole { email, role } => run_set_role(&config, &email, &role),
        Command::Login { email } => run_login(&config, &email),
        Command::Transitions => {
            print_transitions();
            Ok(())
        }
    }
}

fn run_init(config: &AppConfig) -> Result<()> {
    db::open(&config.database.path)?;
    std::fs::create_dir_all(&config.blobs.dir)
        .with_context(|| format!("Failed to create blob dir: {:?}", config.blobs.dir))?;

    println!("✓ Database initialized: {:?}", config.database.path);
    println!("✓ Blob directory: {:?}", config.blobs.dir);
    Ok(())
}

fn run_import(config: &AppConfig, csv: &Path) -> Result<()> {
    let conn = db::open(&config.database.path)?;

    println!("📂 Loading {:?}...", csv);
    let rows = load_properties_csv(csv)?;
    println!("✓ Loaded {} rows", rows.len());

    let report = import_properties(&conn, rows, "csv_importer")?;

    println!("✓ Inserted: {} draft properties", report.inserted);
    println!("✓ Skipped: {}", report.skipped);
    for problem in &report.problems {
        println!("   - {}", problem);
    }
    Ok(())
}

fn run_add_user(config: &AppConfig, email: &str, name: &str, role: Option<Role>) -> Result<()> {
    let conn = db::open(&config.database.path)?;
    let user = create_user(&conn, email, name, role)?;

    println!("✓ Created user {} ({})", user.email, user.id);
    Ok(())
}

fn run_set_role(config: &AppConfig, email: &str, role: &str) -> Result<()> {
    let role = match role {
        "none" => None,
        other => Some(other.parse::<Role>()?),
    };

    let conn = db::open(&config.database.path)?;
    let user = find_user_by_email(&conn, email)?
        .ok_or_else(|| anyhow!("No user with email {}", email))?;
    set_user_role(&conn, "cli", &user.id, role)?;

    println!(
        "✓ {} is now {}",
        user.email,
        role.map(|r| r.as_str()).unwrap_or("without a role")
    );
    Ok(())
}

fn run_login(config: &AppConfig, email: &str) -> Result<()> {
    let conn = db::open(&config.database.path)?;
    let user = find_user_by_email(&conn, email)?
        .ok_or_else(|| anyhow!("No user with email {}", email))?;
    let token = create_session(&conn, &user.id)?;

    println!("session={}", token);
    Ok(())
}

fn print_transitions() {
    for status in PropertyStatus::ALL {
        let next: Vec<&str> = status.allowed_next().iter().map(|s| s.as_str()).collect();
        if next.is_empty() {
            println!("{:<12} (terminal)", status.as_str());
        } else {
            println!("{:<12} -> {}", status.as_str(), next.join(", "));
        }
    }
}
