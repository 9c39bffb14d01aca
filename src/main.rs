use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicator_scorecard_lib::models::{
    CreateRelationPayload, ListIndicatorsFilters, RedeemInvitePayload, SaveBscPayload, SaveCategoryPayload,
    SaveIndicatorPayload, SavePersonPayload,
};
use indicator_scorecard_lib::{init_tracing, ScorecardService, ServiceConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

/// Indicator hierarchy and balanced-scorecard store.
///
/// Every command prints its result as JSON. Mutations read their input from
/// --payload, e.g.:
///   scorecard indicator save --payload '{"name":"Revenue","method":"sum"}'
///   scorecard relation create --parent 1 --child 2
///   scorecard invite redeem --payload '{"code":"...","username":"ana","password":"..."}'
#[derive(Parser, Debug)]
#[command(name = "scorecard", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// YAML configuration file; defaults apply when omitted
    #[arg(short, long, value_name = "FILE", env = "SCORECARD_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration
    #[arg(long, value_name = "DIR", env = "SCORECARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create, read and delete indicators
    Indicator {
        #[command(subcommand)]
        action: IndicatorCommand,
    },
    /// Parent/child links between indicators
    Relation {
        #[command(subcommand)]
        action: RelationCommand,
    },
    /// Indicator categories
    Category {
        #[command(subcommand)]
        action: CategoryCommand,
    },
    /// Balanced scorecards grouping categories
    Bsc {
        #[command(subcommand)]
        action: BscCommand,
    },
    /// People who may be invited to register
    Person {
        #[command(subcommand)]
        action: PersonCommand,
    },
    /// Registration invite codes
    Invite {
        #[command(subcommand)]
        action: InviteCommand,
    },
    /// Registered accounts
    Account {
        #[command(subcommand)]
        action: AccountCommand,
    },
    /// Runtime settings stored in the database
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum IndicatorCommand {
    /// Create (no "id") or update (with "id"); omitted fields are kept
    Save {
        #[arg(long, value_name = "JSON")]
        payload: String,
    },
    Get {
        id: i64,
    },
    List {
        /// Only indicators linked to this category
        #[arg(long, value_name = "ID")]
        category: Option<i64>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum RelationCommand {
    Create {
        #[arg(long)]
        parent: i64,
        #[arg(long)]
        child: i64,
    },
    List,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Save {
        #[arg(long, value_name = "JSON")]
        payload: String,
    },
    Get {
        id: i64,
    },
    List,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum BscCommand {
    Save {
        #[arg(long, value_name = "JSON")]
        payload: String,
    },
    Get {
        id: i64,
    },
    List,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum PersonCommand {
    Save {
        #[arg(long, value_name = "JSON")]
        payload: String,
    },
    Get {
        id: i64,
    },
    List,
    /// Also removes the person's account and profile
    Delete {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum InviteCommand {
    /// Issue a fresh code, replacing any previous one
    Issue {
        person_id: i64,
    },
    Show {
        person_id: i64,
    },
    Redeem {
        #[arg(long, value_name = "JSON")]
        payload: String,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    List,
    /// Check a password without printing anything sensitive
    Verify {
        username: String,
        #[arg(long, env = "SCORECARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    /// Deep-merge a JSON object into the stored settings
    Update {
        #[arg(long, value_name = "JSON")]
        payload: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServiceConfig::load_or_default(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    init_tracing(&config).context("failed to initialise logging")?;

    let service = ScorecardService::open(&config).context("failed to open the scorecard database")?;
    run(&service, cli.command)
}

fn run(service: &ScorecardService, command: Commands) -> Result<()> {
    match command {
        Commands::Indicator { action } => match action {
            IndicatorCommand::Save { payload } => {
                let payload: SaveIndicatorPayload = parse_payload(&payload)?;
                print_json(&service.create_or_update_indicator(payload)?)
            }
            IndicatorCommand::Get { id } => print_json(&service.get_indicator(id)?),
            IndicatorCommand::List { category } => print_json(&service.list_indicators(ListIndicatorsFilters {
                category_id: category,
            })?),
            IndicatorCommand::Delete { id } => print_json(&service.delete_indicator(id)?),
        },
        Commands::Relation { action } => match action {
            RelationCommand::Create { parent, child } => print_json(&service.create_relation(CreateRelationPayload {
                parent_id: parent,
                child_id: child,
            })?),
            RelationCommand::List => print_json(&service.list_relations()?),
            RelationCommand::Delete { id } => print_json(&service.delete_relation(id)?),
        },
        Commands::Category { action } => match action {
            CategoryCommand::Save { payload } => {
                let payload: SaveCategoryPayload = parse_payload(&payload)?;
                print_json(&service.save_category(payload)?)
            }
            CategoryCommand::Get { id } => print_json(&service.get_category(id)?),
            CategoryCommand::List => print_json(&service.list_categories()?),
            CategoryCommand::Delete { id } => print_json(&service.delete_category(id)?),
        },
        Commands::Bsc { action } => match action {
            BscCommand::Save { payload } => {
                let payload: SaveBscPayload = parse_payload(&payload)?;
                print_json(&service.save_bsc(payload)?)
            }
            BscCommand::Get { id } => print_json(&service.get_bsc(id)?),
            BscCommand::List => print_json(&service.list_bscs()?),
            BscCommand::Delete { id } => print_json(&service.delete_bsc(id)?),
        },
        Commands::Person { action } => match action {
            PersonCommand::Save { payload } => {
                let payload: SavePersonPayload = parse_payload(&payload)?;
                print_json(&service.save_person(payload)?)
            }
            PersonCommand::Get { id } => print_json(&service.get_person(id)?),
            PersonCommand::List => print_json(&service.list_persons()?),
            PersonCommand::Delete { id } => print_json(&service.delete_person(id)?),
        },
        Commands::Invite { action } => match action {
            InviteCommand::Issue { person_id } => print_json(&service.issue_invite_code(person_id)?),
            InviteCommand::Show { person_id } => print_json(&service.get_invite_code(person_id)?),
            InviteCommand::Redeem { payload } => {
                let payload: RedeemInvitePayload = parse_payload(&payload)?;
                print_json(&service.redeem_invite_code(payload)?)
            }
        },
        Commands::Account { action } => match action {
            AccountCommand::List => print_json(&service.list_accounts()?),
            AccountCommand::Verify { username, password } => {
                let valid = service.verify_account_password(&username, &password)?;
                print_json(&serde_json::json!({ "username": username, "valid": valid }))
            }
        },
        Commands::Settings { action } => match action {
            SettingsCommand::Show => print_json(&service.get_settings()?),
            SettingsCommand::Update { payload } => {
                let update: serde_json::Value = parse_payload(&payload)?;
                print_json(&service.update_settings(update)?)
            }
        },
    }
}

fn parse_payload<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).context("--payload is not valid JSON for this command")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
