//! Depot authorization admin CLI.
//!
//! Inspects and maintains the policy facts of a running deployment: seed
//! administrator and tenant defaults, evaluate requests, list facts, rebuild
//! the facts from the catalog and apply database migrations.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use depot_core::config::{CatalogBackend, Config};
use depot_core::db::Database;
use depot_core::rbac::{GrantFact, GroupingFact, PolicyDecision};
use depot_core::telemetry::{describe_metrics, init_logging};
use depot_core::{AuthzCore, DepotError};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "depot-authz",
    version,
    about = "Depot authorization administration",
    long_about = "Inspect and maintain the policy facts behind Depot's multi-tenant authorization.",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DEPOT_CONFIG")]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed administrator grants and tenant default roles
    Bootstrap {
        /// Tenant whose default roles are initialised (repeatable)
        #[arg(short, long = "tenant")]
        tenants: Vec<String>,

        /// User granted the administrator role in every tenant (repeatable)
        #[arg(short, long = "admin")]
        admins: Vec<String>,
    },

    /// Evaluate one authorization request
    Enforce {
        subject: String,
        domain: String,
        object: String,
        action: String,
    },

    /// List grant facts
    Grants {
        /// Only grants in this domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Only grants to this subject
        #[arg(short, long)]
        subject: Option<String>,
    },

    /// List grouping facts
    Groupings {
        /// Only groupings in this domain
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Roles a user holds directly in a domain
    RolesOf { user: String, domain: String },

    /// Users holding a role directly in a domain
    UsersOf { role: String, domain: String },

    /// Discard all facts and recompute them from the catalog
    Rebuild {
        /// Rebuild even though the catalog is not persistent
        #[arg(long)]
        force: bool,
    },

    /// Apply pending database migrations
    Migrate,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Display Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Tabled)]
struct GrantRow {
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Object")]
    object: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl From<GrantFact> for GrantRow {
    fn from(fact: GrantFact) -> Self {
        Self {
            subject: fact.subject,
            domain: display_domain(&fact.domain),
            object: fact.object,
            action: fact.action,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct GroupingRow {
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Domain")]
    domain: String,
}

impl From<GroupingFact> for GroupingRow {
    fn from(fact: GroupingFact) -> Self {
        Self {
            user: fact.user,
            role: fact.role,
            domain: display_domain(&fact.domain),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct NameRow {
    #[tabled(rename = "Name")]
    name: String,
}

#[derive(Debug, Serialize)]
struct EnforceOutput<'a> {
    subject: &'a str,
    domain: &'a str,
    object: &'a str,
    action: &'a str,
    #[serde(flatten)]
    decision: &'a PolicyDecision,
}

fn display_domain(domain: &str) -> String {
    if domain.is_empty() {
        "(system)".to_string()
    } else {
        domain.to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output Helpers
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn print_success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "status": "success", "message": message }));
            }
            OutputFormat::Table => {
                println!("{} {}", "[OK]".green().bold(), message);
            }
        }
    }

    fn print_error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({ "status": "error", "message": message }));
            }
            OutputFormat::Table => {
                eprintln!("{} {}", "[ERROR]".red().bold(), message);
            }
        }
    }

    fn print_warning(&self, message: &str) {
        if matches!(self.format, OutputFormat::Table) {
            eprintln!("{} {}", "[WARN]".yellow().bold(), message);
        }
    }

    fn print_table<T: Tabled + Serialize>(&self, items: &[T]) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.print_json(&items),
            OutputFormat::Table => {
                if items.is_empty() {
                    println!("{}", "No results found.".dimmed());
                    return Ok(());
                }
                let table = Table::new(items)
                    .with(Style::rounded())
                    .with(Modify::new(Columns::first()).with(Alignment::left()))
                    .to_string();
                println!("{}", table);
                Ok(())
            }
        }
    }

    fn print_json<T: Serialize>(&self, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        println!("{}", json);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    if let Err(err) = run(cli, &output).await {
        if let Some(depot) = err.downcast_ref::<DepotError>() {
            depot.log();
        }
        output.print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &OutputHelper) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;
    describe_metrics();

    // Only `bootstrap` seeds anything.
    let (tenants, admins) = match &cli.command {
        Commands::Bootstrap { tenants, admins } => (tenants.clone(), admins.clone()),
        _ => {
            config.bootstrap.seed_admin = false;
            config.bootstrap.tenants.clear();
            config.bootstrap.admin_users.clear();
            (Vec::new(), Vec::new())
        }
    };

    match cli.command {
        Commands::Migrate => migrate(&config, output).await,
        Commands::Bootstrap { .. } => {
            config.bootstrap.tenants.extend(tenants);
            config.bootstrap.admin_users.extend(admins);
            let bootstrap = config.bootstrap.clone();
            let core = AuthzCore::from_config(&config).await?;
            output.print_success(&format!(
                "Bootstrapped {} tenant(s), {} administrator(s); {} grant(s) in store",
                bootstrap.tenants.len(),
                bootstrap.admin_users.len(),
                core.store().grant_count().await
            ));
            Ok(())
        }
        Commands::Enforce { subject, domain, object, action } => {
            let core = AuthzCore::from_config(&config).await?;
            let decision = core.enforcer().decide(&subject, &domain, &object, &action).await?;
            match output.format {
                OutputFormat::Json => output.print_json(&EnforceOutput {
                    subject: &subject,
                    domain: &domain,
                    object: &object,
                    action: &action,
                    decision: &decision,
                }),
                OutputFormat::Table => {
                    match &decision {
                        PolicyDecision::Allow(path) => {
                            println!("{} via {}", "ALLOW".green().bold(), path)
                        }
                        PolicyDecision::Deny => println!("{}", "DENY".red().bold()),
                    }
                    Ok(())
                }
            }
        }
        Commands::Grants { domain, subject } => {
            let core = AuthzCore::from_config(&config).await?;
            let rows: Vec<GrantRow> = core
                .store()
                .all_grants()
                .await
                .into_iter()
                .filter(|g| domain.as_deref().map_or(true, |d| g.domain == d))
                .filter(|g| subject.as_deref().map_or(true, |s| g.subject == s))
                .map(GrantRow::from)
                .collect();
            output.print_table(&rows)
        }
        Commands::Groupings { domain } => {
            let core = AuthzCore::from_config(&config).await?;
            let rows: Vec<GroupingRow> = core
                .store()
                .all_groupings()
                .await
                .into_iter()
                .filter(|g| domain.as_deref().map_or(true, |d| g.domain == d))
                .map(GroupingRow::from)
                .collect();
            output.print_table(&rows)
        }
        Commands::RolesOf { user, domain } => {
            let core = AuthzCore::from_config(&config).await?;
            let rows = names(core.roles_of(&user, &domain).await);
            output.print_table(&rows)
        }
        Commands::UsersOf { role, domain } => {
            let core = AuthzCore::from_config(&config).await?;
            let rows = names(core.users_of(&role, &domain).await);
            output.print_table(&rows)
        }
        Commands::Rebuild { force } => {
            if config.catalog.backend == CatalogBackend::Memory {
                if !force {
                    bail!("the catalog backend is in-memory; a rebuild would discard every fact (pass --force to proceed)");
                }
                output.print_warning("Rebuilding from an empty in-memory catalog");
            }
            let core = AuthzCore::from_config(&config).await?;
            let report = core.rebuild().await?;
            match output.format {
                OutputFormat::Json => output.print_json(&report),
                OutputFormat::Table => {
                    output.print_success(&format!(
                        "Rebuilt policy: {} grant(s), {} grouping(s)",
                        report.grants, report.groupings
                    ));
                    Ok(())
                }
            }
        }
    }
}

async fn migrate(config: &Config, output: &OutputHelper) -> Result<()> {
    let Some(db_config) = &config.database else {
        bail!("no [database] section configured");
    };
    let database = Database::connect(db_config).await?;
    database.migrate().await?;
    output.print_success("Migrations applied");
    Ok(())
}

fn names(values: Vec<String>) -> Vec<NameRow> {
    values.into_iter().map(|name| NameRow { name }).collect()
}
