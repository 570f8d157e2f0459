//! IUDX Auth administration CLI — `iudx-auth` command.
//!
//! Manages the authorization database directly: schema setup, users and
//! roles, the certificate revocation list, access grants and token audits.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use iudx_auth::grant::resolve_owner;
use iudx_auth::storage::{crl, users};
use iudx_auth::time::{now_secs, secs_to_rfc3339};
use iudx_auth::token;
use iudx_auth::{AuthConfig, AuthService, Owner, RevocationEntry, Role, RoleStatus, Store};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// IUDX Auth CLI — administer users, grants and revocations of an IUDX
/// authorization server.
#[derive(Parser, Debug)]
#[command(
    name = "iudx-auth",
    about = "IUDX Auth administration CLI",
    version,
    long_about = "iudx-auth — IUDX Auth administration CLI\n\nInitialize the database, onboard users and roles, load the revocation list,\nmanage access grants and audit issued tokens."
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the configuration)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Capability table path (overrides the configuration)
    #[arg(long, global = true)]
    capabilities: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database schema
    Init,

    /// Manage users and roles
    User {
        #[command(subcommand)]
        subcommand: UserCommands,
    },

    /// Manage the certificate revocation list
    Crl {
        #[command(subcommand)]
        subcommand: CrlCommands,
    },

    /// Manage access grants of a provider
    Grant {
        #[command(subcommand)]
        subcommand: GrantCommands,
    },

    /// Audit tokens issued to, or naming, a user
    Audit {
        /// User email
        #[arg(long)]
        email: String,

        /// Look-back window in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommands {
    /// Add a user
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },

    /// Give a user a role, or change its status
    Role {
        #[arg(long)]
        email: String,

        /// provider, consumer, data ingester, onboarder, delegate or admin
        #[arg(long)]
        role: String,

        /// pending, approved or rejected
        #[arg(long, default_value = "approved")]
        status: String,
    },

    /// Show a user's name and roles
    Show {
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand, Debug)]
enum CrlCommands {
    /// Replace the list with a JSON array of {issuer, serial, fingerprint}
    Set {
        /// JSON file ("-" for stdin)
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the current list
    Show,
}

#[derive(Subcommand, Debug)]
enum GrantCommands {
    /// Create grants from a JSON array of grant requests
    Create {
        /// Provider email
        #[arg(long)]
        provider: String,

        /// JSON file ("-" for stdin)
        #[arg(long)]
        file: PathBuf,
    },

    /// List a provider's active grants
    List {
        #[arg(long)]
        provider: String,
    },

    /// Delete grants by id, optionally only some capabilities
    Delete {
        #[arg(long)]
        provider: String,

        /// Grant id
        #[arg(long)]
        id: i64,

        /// Capabilities to withdraw (default: the whole grant)
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let verbose = cli.verbose;

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Init => cmd_init(&config, verbose),
        Commands::User { subcommand } => match subcommand {
            UserCommands::Add {
                email,
                title,
                first_name,
                last_name,
            } => cmd_user_add(
                &config,
                &email,
                title.as_deref(),
                first_name.as_deref(),
                last_name.as_deref(),
            ),
            UserCommands::Role {
                email,
                role,
                status,
            } => cmd_user_role(&config, &email, &role, &status),
            UserCommands::Show { email } => cmd_user_show(&config, &email),
        },
        Commands::Crl { subcommand } => match subcommand {
            CrlCommands::Set { file } => cmd_crl_set(&config, &file),
            CrlCommands::Show => cmd_crl_show(&config),
        },
        Commands::Grant { subcommand } => match subcommand {
            GrantCommands::Create { provider, file } => cmd_grant_create(&config, &provider, &file),
            GrantCommands::List { provider } => cmd_grant_list(&config, &provider, verbose),
            GrantCommands::Delete {
                provider,
                id,
                capabilities,
            } => cmd_grant_delete(&config, &provider, id, &capabilities),
        },
        Commands::Audit { email, hours } => cmd_audit(&config, &email, hours, verbose),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> Result<AuthConfig> {
    let mut config = match &cli.config {
        Some(path) => AuthConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AuthConfig::default(),
    };

    if let Some(db) = &cli.database {
        config.database_path = db.clone();
    }
    if let Some(caps) = &cli.capabilities {
        config.capabilities_path = caps.clone();
    }
    Ok(config)
}

fn open_store(config: &AuthConfig) -> Result<Store> {
    log::debug!("opening database {}", config.database_path.display());
    Store::open(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path.display()))
}

fn open_service(config: &AuthConfig) -> Result<AuthService> {
    AuthService::open(config.clone()).with_context(|| {
        format!(
            "failed to open service (database {}, capabilities {})",
            config.database_path.display(),
            config.capabilities_path.display()
        )
    })
}

fn read_json(path: &Path) -> Result<Value> {
    let content = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&content).context("input is not valid JSON")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn owner(svc: &AuthService, provider: &str) -> Result<Owner> {
    svc.store()
        .with_conn(|conn| resolve_owner(conn, provider, None))
        .with_context(|| format!("'{provider}' is not an approved provider"))
}

// ── Command implementations ───────────────────────────────────────────────────

/// `iudx-auth init`
fn cmd_init(config: &AuthConfig, verbose: bool) -> Result<()> {
    open_store(config)?;
    println!("Initialized database at {}", config.database_path.display());

    if verbose {
        println!("  Server:     {}", config.server_name);
        println!("  Catalogue:  {}", config.catalogue_server);
        println!("  Root CAs:   {}", config.root_ca_emails.join(", "));
    }
    Ok(())
}

/// `iudx-auth user add --email EMAIL [--title ..] [--first-name ..] [--last-name ..]`
fn cmd_user_add(
    config: &AuthConfig,
    email: &str,
    title: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<()> {
    if !iudx_auth::identity::is_valid_email(email) {
        bail!("invalid email '{email}'");
    }
    let store = open_store(config)?;
    let id = store.with_conn(|conn| users::add_user(conn, email, title, first_name, last_name))?;
    println!("User {} (id {id})", email.to_ascii_lowercase());
    Ok(())
}

/// `iudx-auth user role --email EMAIL --role ROLE [--status STATUS]`
fn cmd_user_role(config: &AuthConfig, email: &str, role: &str, status: &str) -> Result<()> {
    let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
    let status: RoleStatus = status.parse().map_err(|e: String| anyhow!(e))?;

    let store = open_store(config)?;
    store.with_conn(|conn| {
        let uid = users::user_id(conn, email)?
            .ok_or_else(|| iudx_auth::AuthError::NotFound(format!("no user '{email}'")))?;
        users::set_role(conn, uid, role, status)
    })?;

    println!("{} is {} {}", email.to_ascii_lowercase(), status.as_str(), role);
    Ok(())
}

/// `iudx-auth user show --email EMAIL`
fn cmd_user_show(config: &AuthConfig, email: &str) -> Result<()> {
    let store = open_store(config)?;
    let (name, roles) = store
        .with_conn(|conn| users::profile(conn, email))?
        .ok_or_else(|| anyhow!("no user '{email}'"))?;
    print_json(&json!({ "id": email.to_ascii_lowercase(), "user_name": name, "roles": roles }))
}

/// `iudx-auth crl set --file FILE`
fn cmd_crl_set(config: &AuthConfig, file: &Path) -> Result<()> {
    let entries: Vec<RevocationEntry> =
        serde_json::from_value(read_json(file)?).context("expected [{issuer, serial, fingerprint}]")?;

    let store = open_store(config)?;
    let n = store.with_transaction(|conn| crl::replace(conn, &entries))?;
    println!("Revocation list now has {n} entries");
    Ok(())
}

/// `iudx-auth crl show`
fn cmd_crl_show(config: &AuthConfig) -> Result<()> {
    let store = open_store(config)?;
    let entries = store.with_conn(crl::load)?;
    print_json(&entries)
}

/// `iudx-auth grant create --provider EMAIL --file FILE`
fn cmd_grant_create(config: &AuthConfig, provider: &str, file: &Path) -> Result<()> {
    let body = read_json(file)?;
    let svc = open_service(config)?;
    let owner = owner(&svc, provider)?;

    svc.create_grants(&owner, &body)?;
    let n = body.as_array().map(Vec::len).unwrap_or_default();
    println!("Created {n} grant(s) for {}", owner.email);
    Ok(())
}

/// `iudx-auth grant list --provider EMAIL`
fn cmd_grant_list(config: &AuthConfig, provider: &str, verbose: bool) -> Result<()> {
    let svc = open_service(config)?;
    let owner = owner(&svc, provider)?;
    let grants = svc.list_grants(&owner)?;

    if verbose {
        return print_json(&grants);
    }

    if grants.is_empty() {
        println!("No active grants for {}", owner.email);
        return Ok(());
    }

    println!("{:<6} {:<14} {:<32} {:<10} ITEM", "ID", "ROLE", "GRANTEE", "CREATED");
    for g in &grants {
        let item = g
            .item
            .as_ref()
            .map(|i| i.cat_id.clone())
            .unwrap_or_else(|| g.item_type.to_string());
        let created = secs_to_rfc3339(g.created);
        let created = created.split('T').next().unwrap_or_default();
        println!("{:<6} {:<14} {:<32} {:<10} {item}", g.id, g.role, g.email, created);
        if let Some(caps) = &g.capabilities {
            println!("{:<6} capabilities: {}", "", caps.join(", "));
        }
    }
    Ok(())
}

/// `iudx-auth grant delete --provider EMAIL --id ID [--capabilities a,b]`
fn cmd_grant_delete(config: &AuthConfig, provider: &str, id: i64, capabilities: &[String]) -> Result<()> {
    let svc = open_service(config)?;
    let owner = owner(&svc, provider)?;

    let mut item = json!({ "id": id });
    if !capabilities.is_empty() {
        item["capabilities"] = json!(capabilities);
    }
    svc.delete_grants(&owner, &json!([item]))?;

    match capabilities {
        [] => println!("Deleted grant {id}"),
        caps => println!("Withdrew {} from grant {id}", caps.join(", ")),
    }
    Ok(())
}

/// `iudx-auth audit --email EMAIL [--hours N]`
fn cmd_audit(config: &AuthConfig, email: &str, hours: i64, verbose: bool) -> Result<()> {
    let store = open_store(config)?;
    let report = token::audit(&store, &email.to_ascii_lowercase(), &json!({ "hours": hours }), now_secs())?;

    if verbose {
        return print_json(&report);
    }

    println!("Issued to {email}: {}", report.as_consumer.len());
    for t in &report.as_consumer {
        println!(
            "  {}  expires {}  revoked={} introspected={}",
            t.token_issued_at, t.expiry, t.revoked, t.introspected
        );
    }
    println!("Naming {email} as provider: {}", report.as_provider.len());
    for t in &report.as_provider {
        println!(
            "  {}  consumer {}  revoked={}",
            t.token_issued_at,
            t.consumer.as_deref().unwrap_or("-"),
            t.revoked
        );
    }
    Ok(())
}
