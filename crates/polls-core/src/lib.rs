use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Longest accepted question or choice text, in characters.
pub const MAX_TEXT_CHARS: usize = 200;

/// How far back a visible question still counts as recently published.
pub const RECENT_WINDOW: Duration = Duration::DAY;

/// Number of questions shown on the index page unless configured otherwise.
pub const DEFAULT_INDEX_LIMIT: usize = 5;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PollsError {
    #[error("question not found: {0}")]
    NotFound(QuestionId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("You didn't select a choice.")]
    NoChoiceSelected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct QuestionId(pub i64);

impl Display for QuestionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ChoiceId(pub i64);

impl Display for ChoiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub question_text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub pub_date: OffsetDateTime,
}

impl Question {
    #[must_use]
    pub fn is_visible(&self, now: OffsetDateTime) -> bool {
        is_visible(self.pub_date, now)
    }

    #[must_use]
    pub fn was_published_recently(&self, now: OffsetDateTime) -> bool {
        was_published_recently(self.pub_date, now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Choice {
    pub id: ChoiceId,
    pub question_id: QuestionId,
    pub choice_text: String,
    pub votes: u32,
}

/// Validate a user supplied text field shared by questions and choices.
///
/// # Errors
/// Returns [`PollsError::Validation`] naming `field` when `value` is blank or
/// longer than [`MAX_TEXT_CHARS`] characters.
pub fn validate_text(field: &str, value: &str) -> Result<(), PollsError> {
    if value.trim().is_empty() {
        return Err(PollsError::Validation(format!("{field} MUST NOT be blank")));
    }

    let length = value.chars().count();
    if length > MAX_TEXT_CHARS {
        return Err(PollsError::Validation(format!(
            "{field} MUST be at most {MAX_TEXT_CHARS} characters, got {length}"
        )));
    }

    Ok(())
}

/// A record is visible once its publish date is not after `now`.
#[must_use]
pub fn is_visible(pub_date: OffsetDateTime, now: OffsetDateTime) -> bool {
    pub_date <= now
}

/// True iff `now - 1 day <= pub_date <= now`. Both bounds are inclusive.
#[must_use]
pub fn was_published_recently(pub_date: OffsetDateTime, now: OffsetDateTime) -> bool {
    // Near the minimum representable date the window has no lower bound.
    let after_window_start = match now.checked_sub(RECENT_WINDOW) {
        Some(window_start) => window_start <= pub_date,
        None => true,
    };
    after_window_start && is_visible(pub_date, now)
}

/// Most recent first; equal publish dates fall back to the newest id.
fn recency_order(a: &Question, b: &Question) -> Ordering {
    b.pub_date.cmp(&a.pub_date).then_with(|| b.id.cmp(&a.id))
}

/// Return the visible subset of `records`, most recently published first.
///
/// The input is never mutated. Ties on `pub_date` are broken by descending
/// [`QuestionId`], so the result does not depend on input order.
#[must_use]
pub fn list_visible(records: &[Question], now: OffsetDateTime) -> Vec<Question> {
    let mut visible =
        records.iter().filter(|record| record.is_visible(now)).cloned().collect::<Vec<_>>();
    visible.sort_by(recency_order);
    visible
}

/// [`list_visible`] truncated to the first `limit` entries.
#[must_use]
pub fn latest_visible(records: &[Question], now: OffsetDateTime, limit: usize) -> Vec<Question> {
    let mut visible = list_visible(records, now);
    visible.truncate(limit);
    visible
}

/// Look up one question by id, hiding questions that are not yet published.
///
/// # Errors
/// Returns [`PollsError::NotFound`] when no record has `id`, or when its
/// publish date is after `now`. Both cases are indistinguishable to callers.
pub fn get_visible_or_not_found(
    records: &[Question],
    id: QuestionId,
    now: OffsetDateTime,
) -> Result<&Question, PollsError> {
    records
        .iter()
        .find(|record| record.id == id)
        .filter(|record| record.is_visible(now))
        .ok_or(PollsError::NotFound(id))
}

/// Resolve the submitted choice against the choices of one question.
///
/// # Errors
/// Returns [`PollsError::NoChoiceSelected`] when nothing was submitted or the
/// id does not belong to `choices`.
pub fn find_choice(choices: &[Choice], choice_id: Option<ChoiceId>) -> Result<&Choice, PollsError> {
    let choice_id = choice_id.ok_or(PollsError::NoChoiceSelected)?;
    choices.iter().find(|choice| choice.id == choice_id).ok_or(PollsError::NoChoiceSelected)
}

#[must_use]
pub fn total_votes(choices: &[Choice]) -> u64 {
    choices.iter().map(|choice| u64::from(choice.votes)).sum()
}
