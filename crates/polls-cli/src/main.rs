use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use polls_api::{AddChoiceRequest, CreateQuestionRequest, PollsApi, VoteRequest};
use polls_core::{ChoiceId, QuestionId, DEFAULT_INDEX_LIMIT};
use serde_json::Value;
use time::{Duration, OffsetDateTime};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "polls")]
#[command(about = "Polls CLI")]
struct Cli {
    #[arg(long, env = "POLLS_DB", default_value = "./polls.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Question {
        #[command(subcommand)]
        command: Box<QuestionCommand>,
    },
    Choice {
        #[command(subcommand)]
        command: Box<ChoiceCommand>,
    },
    Vote(VoteArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum QuestionCommand {
    Add(QuestionAddArgs),
    List(QuestionListArgs),
    Show(QuestionViewArgs),
    Results(QuestionViewArgs),
    Delete(QuestionDeleteArgs),
}

#[derive(Debug, Args)]
struct QuestionAddArgs {
    #[arg(long)]
    text: String,
    /// Publish timestamp (RFC3339). Defaults to now.
    #[arg(long, conflicts_with = "days_offset")]
    pub_date: Option<String>,
    /// Publish this many days from now; negative values publish in the past.
    #[arg(long, allow_hyphen_values = true)]
    days_offset: Option<i64>,
    #[arg(long = "choice")]
    choices: Vec<String>,
}

#[derive(Debug, Args)]
struct QuestionListArgs {
    #[arg(long, default_value_t = DEFAULT_INDEX_LIMIT)]
    limit: usize,
    #[arg(long)]
    now: Option<String>,
}

#[derive(Debug, Args)]
struct QuestionViewArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    now: Option<String>,
}

#[derive(Debug, Args)]
struct QuestionDeleteArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Subcommand)]
enum ChoiceCommand {
    Add(ChoiceAddArgs),
}

#[derive(Debug, Args)]
struct ChoiceAddArgs {
    #[arg(long)]
    question_id: i64,
    #[arg(long)]
    text: String,
}

#[derive(Debug, Args)]
struct VoteArgs {
    #[arg(long)]
    question_id: i64,
    #[arg(long)]
    choice_id: i64,
    #[arg(long)]
    now: Option<String>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = PollsApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Question { command } => run_question(*command, &api),
        Command::Choice { command } => run_choice(*command, &api),
        Command::Vote(args) => run_vote(&args, &api),
    }
}

fn run_db(command: DbCommand, api: &PollsApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
    }
}

fn run_question(command: QuestionCommand, api: &PollsApi) -> Result<()> {
    match command {
        QuestionCommand::Add(args) => {
            let pub_date = match (args.pub_date.as_deref(), args.days_offset) {
                (Some(raw), _) => Some(parse_rfc3339(raw)?),
                (None, Some(days)) => Some(offset_from_now(days)?),
                (None, None) => None,
            };
            let detail = api.create_question(&CreateQuestionRequest {
                question_text: args.text,
                pub_date,
                choices: args.choices,
            })?;
            emit_json(serde_json::to_value(detail)?)
        }
        QuestionCommand::List(args) => {
            let now = parse_optional_rfc3339(args.now.as_deref())?;
            emit_json(serde_json::to_value(api.index(now, args.limit)?)?)
        }
        QuestionCommand::Show(args) => {
            let now = parse_optional_rfc3339(args.now.as_deref())?;
            emit_json(serde_json::to_value(api.detail(QuestionId(args.id), now)?)?)
        }
        QuestionCommand::Results(args) => {
            let now = parse_optional_rfc3339(args.now.as_deref())?;
            emit_json(serde_json::to_value(api.results(QuestionId(args.id), now)?)?)
        }
        QuestionCommand::Delete(args) => {
            let deleted = api.delete_question(QuestionId(args.id))?;
            emit_json(serde_json::json!({
                "question_id": args.id,
                "deleted": deleted
            }))
        }
    }
}

fn run_choice(command: ChoiceCommand, api: &PollsApi) -> Result<()> {
    match command {
        ChoiceCommand::Add(args) => {
            let choice = api.add_choice(
                QuestionId(args.question_id),
                &AddChoiceRequest { choice_text: args.text },
            )?;
            emit_json(serde_json::to_value(choice)?)
        }
    }
}

fn run_vote(args: &VoteArgs, api: &PollsApi) -> Result<()> {
    let now = parse_optional_rfc3339(args.now.as_deref())?;
    let results = api.vote(
        QuestionId(args.question_id),
        &VoteRequest { choice: Some(ChoiceId(args.choice_id)) },
        now,
    )?;
    emit_json(serde_json::to_value(results)?)
}

fn offset_from_now(days: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::now_utc()
        .checked_add(Duration::days(days))
        .ok_or_else(|| anyhow!("day offset out of range: {days}"))
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<OffsetDateTime> {
    match value {
        Some(raw) => parse_rfc3339(raw),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
