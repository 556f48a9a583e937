use std::path::Path;

use anyhow::{anyhow, Context, Result};
use polls_core::{validate_text, Choice, ChoiceId, PollsError, Question, QuestionId};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS questions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  question_text TEXT NOT NULL CHECK (length(trim(question_text)) > 0),
  pub_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS choices (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  question_id INTEGER NOT NULL,
  choice_text TEXT NOT NULL CHECK (length(trim(choice_text)) > 0),
  votes INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0),
  FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_choices_question_id ON choices(question_id);
";

const SELECT_QUESTION_COLUMNS: &str = "SELECT id, question_text, pub_date FROM questions";

const SELECT_CHOICE_COLUMNS: &str = "SELECT id, question_id, choice_text, votes FROM choices";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a SQLite-backed poll store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to create poll tables")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now_rfc3339()?],
        )
        .context("failed to record migration version 1")?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(())
    }

    /// Persist a new question together with its initial choices and return them
    /// with their freshly assigned ids.
    ///
    /// Every text is validated before anything is written, and all rows are
    /// inserted in one transaction: either the whole poll is stored or nothing is.
    ///
    /// # Errors
    /// Returns [`PollsError::Validation`] (wrapped) for blank or overlong text or a
    /// publish date that cannot be expressed in UTC, or an error when an insert fails.
    pub fn create_question(
        &mut self,
        question_text: &str,
        pub_date: OffsetDateTime,
        choice_texts: &[String],
    ) -> Result<(Question, Vec<Choice>)> {
        validate_text("question_text", question_text)?;
        for choice_text in choice_texts {
            validate_text("choice_text", choice_text)?;
        }
        let pub_date = utc_pub_date(pub_date)?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO questions(question_text, pub_date) VALUES (?1, ?2)",
            params![question_text, rfc3339(pub_date)?],
        )
        .context("failed to insert question")?;
        let question_id = QuestionId(tx.last_insert_rowid());

        let mut choices = Vec::with_capacity(choice_texts.len());
        for choice_text in choice_texts {
            tx.execute(
                "INSERT INTO choices(question_id, choice_text, votes) VALUES (?1, ?2, 0)",
                params![question_id.0, choice_text],
            )
            .context("failed to insert choice")?;
            choices.push(Choice {
                id: ChoiceId(tx.last_insert_rowid()),
                question_id,
                choice_text: choice_text.clone(),
                votes: 0,
            });
        }
        tx.commit().context("failed to commit question transaction")?;

        let question =
            Question { id: question_id, question_text: question_text.to_string(), pub_date };
        Ok((question, choices))
    }

    /// Attach a new choice with zero votes to an existing question.
    ///
    /// # Errors
    /// Returns [`PollsError::Validation`] for bad text and [`PollsError::NotFound`]
    /// when the question does not exist (both wrapped in `anyhow`).
    pub fn add_choice(&mut self, question_id: QuestionId, choice_text: &str) -> Result<Choice> {
        validate_text("choice_text", choice_text)?;
        if self.get_question(question_id)?.is_none() {
            return Err(PollsError::NotFound(question_id).into());
        }

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO choices(question_id, choice_text, votes) VALUES (?1, ?2, 0)",
            params![question_id.0, choice_text],
        )
        .context("failed to insert choice")?;
        let id = ChoiceId(tx.last_insert_rowid());
        tx.commit().context("failed to commit choice transaction")?;

        Ok(Choice { id, question_id, choice_text: choice_text.to_string(), votes: 0 })
    }

    /// Load every stored question, in insertion order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_questions(&self) -> Result<Vec<Question>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_QUESTION_COLUMNS} ORDER BY id ASC"))?;
        let mut rows = stmt.query([])?;
        let mut questions = Vec::new();

        while let Some(row) = rows.next()? {
            questions.push(question_from_row(row)?);
        }

        Ok(questions)
    }

    /// # Errors
    /// Returns an error when the lookup or decoding fails.
    pub fn get_question(&self, id: QuestionId) -> Result<Option<Question>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_QUESTION_COLUMNS} WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.0])?;

        let question = match rows.next()? {
            Some(row) => Some(question_from_row(row)?),
            None => None,
        };
        Ok(question)
    }

    /// Load the choices of one question, in insertion order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_choices(&self, question_id: QuestionId) -> Result<Vec<Choice>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_CHOICE_COLUMNS} WHERE question_id = ?1 ORDER BY id ASC"))?;
        let mut rows = stmt.query(params![question_id.0])?;
        let mut choices = Vec::new();

        while let Some(row) = rows.next()? {
            choices.push(choice_from_row(row)?);
        }

        Ok(choices)
    }

    /// Add one vote to a choice of `question_id` and return the updated choice.
    ///
    /// The increment happens in SQL so concurrent voters never overwrite each other.
    ///
    /// # Errors
    /// Returns [`PollsError::NoChoiceSelected`] (wrapped) when the choice does not
    /// belong to the question, or an error when the update fails.
    pub fn record_vote(&mut self, question_id: QuestionId, choice_id: ChoiceId) -> Result<Choice> {
        let tx = self.conn.transaction().context("failed to start vote transaction")?;
        let changed = tx
            .execute(
                "UPDATE choices SET votes = votes + 1 WHERE id = ?1 AND question_id = ?2",
                params![choice_id.0, question_id.0],
            )
            .context("failed to record vote")?;
        if changed == 0 {
            return Err(PollsError::NoChoiceSelected.into());
        }

        let choice = load_choice(&tx, choice_id)
            .context("failed to reload voted choice")?
            .ok_or_else(|| anyhow!("choice {choice_id} vanished during vote"))?;
        tx.commit().context("failed to commit vote transaction")?;

        Ok(choice)
    }

    /// Delete a question and, through the foreign key cascade, its choices.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_question(&mut self, id: QuestionId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM questions WHERE id = ?1", params![id.0])
            .with_context(|| format!("failed to delete question {id}"))?;
        Ok(deleted > 0)
    }
}

fn question_from_row(row: &Row<'_>) -> Result<Question> {
    let pub_date_raw: String = row.get(2)?;
    Ok(Question {
        id: QuestionId(row.get(0)?),
        question_text: row.get(1)?,
        pub_date: parse_rfc3339(&pub_date_raw)?,
    })
}

fn choice_from_row(row: &Row<'_>) -> Result<Choice> {
    Ok(Choice {
        id: ChoiceId(row.get(0)?),
        question_id: QuestionId(row.get(1)?),
        choice_text: row.get(2)?,
        votes: row.get(3)?,
    })
}

fn utc_pub_date(pub_date: OffsetDateTime) -> Result<OffsetDateTime, PollsError> {
    pub_date.checked_to_offset(UtcOffset::UTC).ok_or_else(|| {
        PollsError::Validation(format!("pub_date {pub_date} is outside the supported UTC range"))
    })
}

fn load_choice(conn: &Connection, id: ChoiceId) -> Result<Option<Choice>> {
    let mut stmt = conn.prepare(&format!("{SELECT_CHOICE_COLUMNS} WHERE id = ?1"))?;
    let mut rows = stmt.query(params![id.0])?;

    let choice = match rows.next()? {
        Some(row) => Some(choice_from_row(row)?),
        None => None,
    };
    Ok(choice)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
