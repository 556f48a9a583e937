use std::path::PathBuf;

use anyhow::Result;
use polls_core::{
    find_choice, get_visible_or_not_found, latest_visible, total_votes, Choice, ChoiceId,
    Question, QuestionId,
};
use polls_store_sqlite::{SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateQuestionRequest {
    pub question_text: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub pub_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddChoiceRequest {
    pub choice_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VoteRequest {
    #[serde(default)]
    pub choice: Option<ChoiceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionSummary {
    pub id: QuestionId,
    pub question_text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub pub_date: OffsetDateTime,
    pub was_published_recently: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexPage {
    pub latest_question_list: Vec<QuestionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionDetail {
    pub question: Question,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsPage {
    pub question: Question,
    pub choices: Vec<Choice>,
    pub total_votes: u64,
}

#[derive(Debug, Clone)]
pub struct PollsApi {
    db_path: PathBuf,
}

impl PollsApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Create a question, publishing it now unless `pub_date` says otherwise,
    /// together with its initial choices.
    ///
    /// # Errors
    /// Returns an error when question or choice validation, or persistence, fails.
    pub fn create_question(&self, input: &CreateQuestionRequest) -> Result<QuestionDetail> {
        let mut store = self.open_migrated_store()?;
        let pub_date = input.pub_date.unwrap_or_else(OffsetDateTime::now_utc);
        let (question, choices) =
            store.create_question(&input.question_text, pub_date, &input.choices)?;
        Ok(QuestionDetail { question, choices })
    }

    /// Add one choice to an existing question, published or not.
    ///
    /// # Errors
    /// Returns an error when the question is missing or persistence fails.
    pub fn add_choice(&self, question_id: QuestionId, input: &AddChoiceRequest) -> Result<Choice> {
        let mut store = self.open_migrated_store()?;
        store.add_choice(question_id, &input.choice_text)
    }

    /// Latest visible questions as of `now`, newest first, at most `limit`.
    ///
    /// # Errors
    /// Returns an error when questions cannot be loaded.
    pub fn index(&self, now: OffsetDateTime, limit: usize) -> Result<IndexPage> {
        let store = self.open_migrated_store()?;
        let questions = store.list_questions()?;
        let latest_question_list = latest_visible(&questions, now, limit)
            .into_iter()
            .map(|question| QuestionSummary {
                was_published_recently: question.was_published_recently(now),
                id: question.id,
                question_text: question.question_text,
                pub_date: question.pub_date,
            })
            .collect();

        Ok(IndexPage { latest_question_list })
    }

    /// # Errors
    /// Returns [`polls_core::PollsError::NotFound`] (wrapped) when the question is
    /// missing or not yet published, or an error when loading fails.
    pub fn detail(&self, id: QuestionId, now: OffsetDateTime) -> Result<QuestionDetail> {
        let store = self.open_migrated_store()?;
        let question = visible_question(&store, id, now)?;
        let choices = store.list_choices(id)?;
        Ok(QuestionDetail { question, choices })
    }

    /// # Errors
    /// Same conditions as [`PollsApi::detail`].
    pub fn results(&self, id: QuestionId, now: OffsetDateTime) -> Result<ResultsPage> {
        let store = self.open_migrated_store()?;
        let question = visible_question(&store, id, now)?;
        results_page(&store, question)
    }

    /// Count one vote for a choice of a visible question and return fresh results.
    ///
    /// # Errors
    /// Returns [`polls_core::PollsError::NotFound`] when the question is hidden and
    /// [`polls_core::PollsError::NoChoiceSelected`] when the submitted choice is
    /// missing or foreign (both wrapped), or an error when persistence fails.
    pub fn vote(
        &self,
        id: QuestionId,
        input: &VoteRequest,
        now: OffsetDateTime,
    ) -> Result<ResultsPage> {
        let mut store = self.open_migrated_store()?;
        let question = visible_question(&store, id, now)?;
        let choices = store.list_choices(id)?;
        let choice = find_choice(&choices, input.choice)?;
        store.record_vote(id, choice.id)?;
        results_page(&store, question)
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_question(&self, id: QuestionId) -> Result<bool> {
        let mut store = self.open_migrated_store()?;
        store.delete_question(id)
    }
}

/// Fetch one question through the same visibility gate the index uses.
fn visible_question(store: &SqliteStore, id: QuestionId, now: OffsetDateTime) -> Result<Question> {
    let candidates = store.get_question(id)?.into_iter().collect::<Vec<_>>();
    let question = get_visible_or_not_found(&candidates, id, now)?;
    Ok(question.clone())
}

fn results_page(store: &SqliteStore, question: Question) -> Result<ResultsPage> {
    let choices = store.list_choices(question.id)?;
    let total_votes = total_votes(&choices);
    Ok(ResultsPage { question, choices, total_votes })
}
