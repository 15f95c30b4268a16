//! # Toolkit Tracker CLI (`tkt`)
//!
//! ## Usage
//!
//! ```bash
//! tkt --config ./config/tkt.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tkt init` | Create the SQLite database and run schema migrations |
//! | `tkt ingest --file <path>` | Record a commit transcript (post-commit hook entry point) |
//! | `tkt component add/list` | Manage components |
//! | `tkt toolkit add/stage/list` | Manage tool kits |
//! | `tkt assoc add/list` | Tie a component to a tool kit on a branch |
//! | `tkt cr create/update/show` | Manage change requests |
//! | `tkt cu show/list` | Inspect code updates and level history |
//! | `tkt report` | Per tool kit / component summary |
//!
//! ## Exit codes
//!
//! `0` success, `3` transcript already processed (nothing to do), `1` error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use toolkit_tracker::change_request::{self, ChangeRequestUpdate, NewChangeRequest};
use toolkit_tracker::code_update;
use toolkit_tracker::config::{self, Config};
use toolkit_tracker::db;
use toolkit_tracker::error::TkError;
use toolkit_tracker::ingest::{self, IngestOutcome};
use toolkit_tracker::migrate;
use toolkit_tracker::models::{CrStatus, CrType, ToolKitStage};
use toolkit_tracker::report;
use toolkit_tracker::toolkit;

/// Returned when the transcript already carries `DB_ID` lines.
const EXIT_NOTHING_TO_DO: u8 = 3;

/// Toolkit Tracker: change requests and code updates for tool-kit release trains.
#[derive(Parser)]
#[command(
    name = "tkt",
    about = "Toolkit Tracker: change requests and code updates for tool-kit release trains",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tkt.toml")]
    config: PathBuf,

    /// Use the database registered under `[db.modes]` with this name.
    #[arg(long, global = true)]
    db_mode: Option<String>,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Record a commit transcript written by the SVN post-commit hook.
    ///
    /// Creates one code update per tool kit under development on the
    /// commit's branch and appends `DB_ID | <id> |` lines to the file.
    Ingest {
        /// Path to the hook's data file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Manage components.
    Component {
        #[command(subcommand)]
        action: ComponentAction,
    },

    /// Manage tool kits.
    Toolkit {
        #[command(subcommand)]
        action: ToolkitAction,
    },

    /// Manage component/tool kit branch associations.
    Assoc {
        #[command(subcommand)]
        action: AssocAction,
    },

    /// Manage change requests.
    Cr {
        #[command(subcommand)]
        action: CrAction,
    },

    /// Inspect code updates.
    Cu {
        #[command(subcommand)]
        action: CuAction,
    },

    /// Summarize code updates, file changes and change requests per tool kit and component.
    Report {
        /// Restrict to one tool kit.
        #[arg(long)]
        toolkit: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ComponentAction {
    /// Register a component.
    Add { name: String },
    /// List components.
    List,
}

#[derive(Subcommand)]
enum ToolkitAction {
    /// Register a tool kit.
    Add {
        name: String,
        /// development, released, or frozen.
        #[arg(long, default_value = "development")]
        stage: ToolKitStage,
    },
    /// Move a tool kit to another stage.
    Stage { name: String, stage: ToolKitStage },
    /// List tool kits.
    List,
}

#[derive(Subcommand)]
enum AssocAction {
    /// Put a component of a tool kit on a branch (creates or moves the association).
    Add {
        #[arg(long)]
        component: String,
        #[arg(long)]
        toolkit: String,
        /// `trunk` or a branch name.
        #[arg(long)]
        branch: String,
    },
    /// List associations.
    List {
        #[arg(long)]
        toolkit: Option<String>,
    },
}

#[derive(Subcommand)]
enum CrAction {
    /// Create a tracked change request.
    Create {
        /// External tracking id (e.g. a ClearQuest id).
        id: String,
        #[arg(long)]
        component: String,
        #[arg(long)]
        toolkit: String,
        #[arg(long, default_value = "submitted")]
        status: CrStatus,
        #[arg(long = "type", default_value = "defect")]
        cr_type: CrType,
        /// 1 (highest) to 4 (lowest).
        #[arg(long, default_value_t = 3)]
        severity: i64,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Update a change request.
    ///
    /// Component and tool kit cannot change once a code update is linked.
    Update {
        id: String,
        #[arg(long)]
        status: Option<CrStatus>,
        #[arg(long)]
        severity: Option<i64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        toolkit: Option<String>,
    },
    /// Show a change request and its linked code updates.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CuAction {
    /// Show a code update with its files and change requests.
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// List a tool kit's code updates, newest first.
    List {
        #[arg(long)]
        toolkit: String,
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<TkError>() {
                Some(tk) => eprintln!("{}", tk.report()),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut cfg = config::load_config(&cli.config)?;
    if let Some(mode) = &cli.db_mode {
        cfg.select_db_mode(mode)?;
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file } => {
            if let IngestOutcome::AlreadyProcessed { .. } = ingest::run_ingest(&cfg, &file).await? {
                return Ok(ExitCode::from(EXIT_NOTHING_TO_DO));
            }
        }
        Commands::Component { action } => run_component(&cfg, action).await?,
        Commands::Toolkit { action } => run_toolkit(&cfg, action).await?,
        Commands::Assoc { action } => run_assoc(&cfg, action).await?,
        Commands::Cr { action } => run_cr(&cfg, action).await?,
        Commands::Cu { action } => run_cu(&cfg, action).await?,
        Commands::Report { toolkit, json } => {
            let pool = db::connect(&cfg).await?;
            let mut conn = pool.acquire().await?;
            let summary = report::build_summary(&mut conn, toolkit.as_deref()).await?;
            let rows = report::rows(&summary);
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                report::print_report(&rows);
            }
            drop(conn);
            pool.close().await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_component(cfg: &Config, action: ComponentAction) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let mut conn = pool.acquire().await?;
    match action {
        ComponentAction::Add { name } => {
            let id = toolkit::add_component(&mut conn, &name).await?;
            println!("component {} added (id {})", name, id);
        }
        ComponentAction::List => {
            for name in toolkit::list_components(&mut conn).await? {
                println!("{}", name);
            }
        }
    }
    drop(conn);
    pool.close().await;
    Ok(())
}

async fn run_toolkit(cfg: &Config, action: ToolkitAction) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let mut conn = pool.acquire().await?;
    match action {
        ToolkitAction::Add { name, stage } => {
            let id = toolkit::add_tool_kit(&mut conn, &name, stage).await?;
            println!("tool kit {} added (id {}, {})", name, id, stage.as_str());
        }
        ToolkitAction::Stage { name, stage } => {
            toolkit::set_stage(&mut conn, &name, stage).await?;
            println!("tool kit {} is now {}", name, stage.as_str());
        }
        ToolkitAction::List => {
            println!("{:<20} {}", "TOOL KIT", "STAGE");
            for tk in toolkit::list_tool_kits(&mut conn).await? {
                println!("{:<20} {}", tk.name, tk.stage);
            }
        }
    }
    drop(conn);
    pool.close().await;
    Ok(())
}

async fn run_assoc(cfg: &Config, action: AssocAction) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let mut conn = pool.acquire().await?;
    match action {
        AssocAction::Add {
            component,
            toolkit: tool_kit,
            branch,
        } => {
            toolkit::associate(&mut conn, &component, &tool_kit, &branch).await?;
            println!("{} in {} tracks branch {}", component, tool_kit, branch);
        }
        AssocAction::List { toolkit: tool_kit } => {
            println!(
                "{:<16} {:<16} {:<12} {}",
                "TOOL KIT", "COMPONENT", "STAGE", "BRANCH"
            );
            for a in toolkit::list_associations(&mut conn, tool_kit.as_deref()).await? {
                println!(
                    "{:<16} {:<16} {:<12} {}",
                    a.tool_kit, a.component, a.stage, a.branch
                );
            }
        }
    }
    drop(conn);
    pool.close().await;
    Ok(())
}

async fn run_cr(cfg: &Config, action: CrAction) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let mut conn = pool.acquire().await?;
    match action {
        CrAction::Create {
            id,
            component,
            toolkit,
            status,
            cr_type,
            severity,
            description,
            user,
        } => {
            let req = NewChangeRequest {
                external_id: id.clone(),
                component,
                tool_kit: toolkit,
                status,
                cr_type,
                severity,
                description,
                user,
            };
            change_request::create_change_request(&mut conn, &req, &cfg.ingest).await?;
            println!("change request {} created", id);
        }
        CrAction::Update {
            id,
            status,
            severity,
            description,
            component,
            toolkit,
        } => {
            let update = ChangeRequestUpdate {
                status,
                severity,
                description,
                component,
                tool_kit: toolkit,
            };
            change_request::update_change_request(&mut conn, &id, &update).await?;
            println!("change request {} updated", id);
        }
        CrAction::Show { id, json } => {
            let cr = change_request::get_change_request(&mut conn, &id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&cr)?);
            } else {
                println!("--- Change Request {} ---", cr.external_id);
                println!("component:    {}", cr.component.as_deref().unwrap_or("-"));
                println!("tool kit:     {}", cr.tool_kit.as_deref().unwrap_or("-"));
                println!("status:       {}", cr.status);
                println!("type:         {}", cr.cr_type);
                println!("severity:     {}", cr.severity);
                if let Some(ref user) = cr.user_id {
                    println!("user:         {}", user);
                }
                println!(
                    "code updates: {}",
                    if cr.code_update_ids.is_empty() {
                        "(none)".to_string()
                    } else {
                        cr.code_update_ids
                            .iter()
                            .map(|id| id.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    }
                );
                println!();
                println!("{}", cr.description);
            }
        }
    }
    drop(conn);
    pool.close().await;
    Ok(())
}

async fn run_cu(cfg: &Config, action: CuAction) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let mut conn = pool.acquire().await?;
    match action {
        CuAction::Show { id, json } => {
            let cu = code_update::get_code_update(&mut conn, id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&cu)?);
            } else {
                code_update::print_code_update(&cu);
            }
        }
        CuAction::List {
            toolkit,
            component,
            limit,
            json,
        } => {
            let entries =
                code_update::list_history(&mut conn, &toolkit, component.as_deref(), limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                code_update::print_history(&toolkit, &entries);
            }
        }
    }
    drop(conn);
    pool.close().await;
    Ok(())
}
