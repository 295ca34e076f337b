//! Field rules applied to a todo submission before anything is written.
//!
//! Validation never writes. It reads the store through [`Lookup`] to check
//! title uniqueness and that the chosen category and tags exist.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::database::{self, DatabaseError, SqlResult};
use crate::model::{Todo, TodoDraft, TITLE_MAX_LENGTH, TITLE_MIN_LENGTH};

/// Raw form input, kept verbatim so a rejected submission can be shown again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TodoForm {
    pub title: String,
    pub description: String,
    pub due_date: String,
    pub category: String,
    pub tags: Vec<String>,
    pub is_resolved: bool,
}

impl TodoForm {
    /// Parses an `application/x-www-form-urlencoded` body. Repeated `tags`
    /// keys accumulate; unknown keys are ignored.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut form = TodoForm::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "title" => form.title = value.into_owned(),
                "description" => form.description = value.into_owned(),
                "due_date" => form.due_date = value.into_owned(),
                "category" => form.category = value.into_owned(),
                "tags" => form.tags.push(value.into_owned()),
                "is_resolved" => form.is_resolved = is_checked(&value),
                _ => {}
            }
        }
        form
    }

    /// Pre-fills the form from a stored todo.
    pub fn from_todo(todo: &Todo) -> Self {
        TodoForm {
            title: todo.title.clone(),
            description: todo.description.clone(),
            due_date: todo
                .due_date
                .map(|due_date| due_date.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
                .unwrap_or_default(),
            category: todo
                .category_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            tags: todo.tags.iter().map(|tag| tag.id.to_string()).collect(),
            is_resolved: todo.is_resolved,
        }
    }
}

fn is_checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "yes"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Title,
    DueDate,
    Category,
    Tags,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::DueDate => "due_date",
            Field::Category => "category",
            Field::Tags => "tags",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Title cannot be empty.")]
    EmptyTitle,
    #[error("Title must be at least 3 characters long.")]
    TitleTooShort,
    #[error("Ensure this value has at most 200 characters (it has {0}).")]
    TitleTooLong(usize),
    #[error("A TODO with this title already exists.")]
    DuplicateTitle,
    #[error("Enter a valid date/time.")]
    InvalidDueDate,
    #[error("Due date cannot be in the past.")]
    DueDateInPast,
    #[error("Select a valid choice. That choice is not one of the available choices.")]
    UnknownCategory,
    #[error("Select a valid choice. {0} is not one of the available choices.")]
    UnknownTag(String),
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            ValidationError::EmptyTitle
            | ValidationError::TitleTooShort
            | ValidationError::TitleTooLong(_)
            | ValidationError::DuplicateTitle => Field::Title,
            ValidationError::InvalidDueDate | ValidationError::DueDateInPast => Field::DueDate,
            ValidationError::UnknownCategory => Field::Category,
            ValidationError::UnknownTag(_) => Field::Tags,
        }
    }
}

/// At most one error per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<ValidationError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(error: ValidationError) -> Self {
        let mut errors = Self::new();
        errors.push(error);
        errors
    }

    /// Records `error` unless its field already has one.
    pub fn push(&mut self, error: ValidationError) {
        if self.get(error.field()).is_none() {
            self.0.push(error);
        }
    }

    pub fn get(&self, field: Field) -> Option<&ValidationError> {
        self.0.iter().find(|error| error.field() == field)
    }

    pub fn contains(&self, error: &ValidationError) -> bool {
        self.0.contains(error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", error.field().as_str(), error)?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("invalid submission: {0}")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Store reads needed by validation.
pub trait Lookup {
    fn title_taken(&self, title: &str, exclude: Option<i64>) -> SqlResult<bool>;
    fn category_exists(&self, category_id: i64) -> SqlResult<bool>;
    fn tag_exists(&self, tag_id: i64) -> SqlResult<bool>;
}

impl Lookup for Connection {
    fn title_taken(&self, title: &str, exclude: Option<i64>) -> SqlResult<bool> {
        database::title_taken(self, title, exclude)
    }

    fn category_exists(&self, category_id: i64) -> SqlResult<bool> {
        database::category_exists(self, category_id)
    }

    fn tag_exists(&self, tag_id: i64) -> SqlResult<bool> {
        database::tag_exists(self, tag_id)
    }
}

/// Validates every field and reports all failures together.
///
/// `exclude` is the id of the todo being updated, if any; it is left out
/// of the duplicate-title check.
pub fn validate_todo<L: Lookup + ?Sized>(
    form: &TodoForm,
    lookup: &L,
    exclude: Option<i64>,
    now: DateTime<Utc>,
) -> Result<TodoDraft, Rejection> {
    let mut errors = FieldErrors::new();

    let title = form.title.trim();
    match check_title_shape(title) {
        Err(error) => errors.push(error),
        Ok(()) => {
            if lookup.title_taken(title, exclude)? {
                errors.push(ValidationError::DuplicateTitle);
            }
        }
    }

    let due_date = match parse_due_date(&form.due_date) {
        Ok(Some(due_date)) if due_date < now => {
            errors.push(ValidationError::DueDateInPast);
            None
        }
        Ok(due_date) => due_date,
        Err(error) => {
            errors.push(error);
            None
        }
    };

    let category_id = clean_category(&form.category, lookup)?.unwrap_or_else(|error| {
        errors.push(error);
        None
    });

    let tag_ids = clean_tags(&form.tags, lookup)?.unwrap_or_else(|error| {
        errors.push(error);
        vec![]
    });

    if !errors.is_empty() {
        return Err(Rejection::Invalid(errors));
    }

    Ok(TodoDraft {
        title: title.to_string(),
        description: form.description.clone(),
        due_date,
        is_resolved: form.is_resolved,
        category_id,
        tag_ids,
    })
}

fn check_title_shape(title: &str) -> Result<(), ValidationError> {
    let length = title.chars().count();
    if length == 0 {
        Err(ValidationError::EmptyTitle)
    } else if length < TITLE_MIN_LENGTH {
        Err(ValidationError::TitleTooShort)
    } else if length > TITLE_MAX_LENGTH {
        Err(ValidationError::TitleTooLong(length))
    } else {
        Ok(())
    }
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Empty input means no due date. Naive values are read as UTC.
pub fn parse_due_date(raw: &str) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(due_date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(due_date.with_timezone(&Utc)));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Some(Utc.from_utc_datetime(&naive)));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Some(Utc.from_utc_datetime(&naive)))
        .ok_or(ValidationError::InvalidDueDate)
}

fn clean_category<L: Lookup + ?Sized>(
    raw: &str,
    lookup: &L,
) -> SqlResult<Result<Option<i64>, ValidationError>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Ok(None));
    }

    let Ok(category_id) = raw.parse::<i64>() else {
        return Ok(Err(ValidationError::UnknownCategory));
    };
    if !lookup.category_exists(category_id)? {
        return Ok(Err(ValidationError::UnknownCategory));
    }

    Ok(Ok(Some(category_id)))
}

fn clean_tags<L: Lookup + ?Sized>(
    raw: &[String],
    lookup: &L,
) -> SqlResult<Result<Vec<i64>, ValidationError>> {
    let mut tag_ids = vec![];
    for value in raw.iter().map(|value| value.trim()).filter(|value| !value.is_empty()) {
        let tag_id = match value.parse::<i64>() {
            Ok(tag_id) if lookup.tag_exists(tag_id)? => tag_id,
            _ => return Ok(Err(ValidationError::UnknownTag(value.to_string()))),
        };
        if !tag_ids.contains(&tag_id) {
            tag_ids.push(tag_id);
        }
    }
    Ok(Ok(tag_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    /// In-memory stand-in for the store: `(id, title)` pairs plus known ids.
    #[derive(Default)]
    struct Snapshot {
        todos: Vec<(i64, String)>,
        categories: Vec<i64>,
        tags: Vec<i64>,
    }

    impl Lookup for Snapshot {
        fn title_taken(&self, title: &str, exclude: Option<i64>) -> SqlResult<bool> {
            let key = title.to_lowercase();
            Ok(self
                .todos
                .iter()
                .any(|(id, existing)| Some(*id) != exclude && existing.to_lowercase() == key))
        }

        fn category_exists(&self, category_id: i64) -> SqlResult<bool> {
            Ok(self.categories.contains(&category_id))
        }

        fn tag_exists(&self, tag_id: i64) -> SqlResult<bool> {
            Ok(self.tags.contains(&tag_id))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn form(title: &str) -> TodoForm {
        TodoForm {
            title: title.to_string(),
            ..TodoForm::default()
        }
    }

    fn errors_of(result: Result<TodoDraft, Rejection>) -> FieldErrors {
        match result {
            Err(Rejection::Invalid(errors)) => errors,
            other => panic!("expected field errors, got {other:?}"),
        }
    }

    #[rstest]
    #[case("", ValidationError::EmptyTitle)]
    #[case("   ", ValidationError::EmptyTitle)]
    #[case("ab", ValidationError::TitleTooShort)]
    #[case("  ab  ", ValidationError::TitleTooShort)]
    #[case(&"x".repeat(201), ValidationError::TitleTooLong(201))]
    fn test_title_shape_rejections(#[case] title: &str, #[case] expected: ValidationError) {
        let errors = errors_of(validate_todo(&form(title), &Snapshot::default(), None, now()));
        assert_eq!(errors.get(Field::Title), Some(&expected));
    }

    #[rstest]
    #[case("abc")]
    #[case("日本語")]
    fn test_three_characters_is_enough(#[case] title: &str) {
        let draft = validate_todo(&form(title), &Snapshot::default(), None, now()).unwrap();
        assert_eq!(draft.title, title);
    }

    #[test]
    fn test_two_hundred_characters_is_accepted() {
        let title = "x".repeat(200);
        assert!(validate_todo(&form(&title), &Snapshot::default(), None, now()).is_ok());
    }

    #[test]
    fn test_title_is_trimmed() {
        let draft = validate_todo(&form("  Buy milk \t"), &Snapshot::default(), None, now()).unwrap();
        assert_eq!(draft.title, "Buy milk");
    }

    #[test]
    fn test_duplicate_title_ignores_case() {
        let snapshot = Snapshot {
            todos: vec![(1, "Work".to_string())],
            ..Snapshot::default()
        };
        let errors = errors_of(validate_todo(&form("WORK"), &snapshot, None, now()));
        assert_eq!(errors.get(Field::Title), Some(&ValidationError::DuplicateTitle));
    }

    #[test]
    fn test_update_may_keep_its_own_title() {
        let snapshot = Snapshot {
            todos: vec![(1, "Work".to_string()), (2, "Play".to_string())],
            ..Snapshot::default()
        };
        assert!(validate_todo(&form("work"), &snapshot, Some(1), now()).is_ok());
        let errors = errors_of(validate_todo(&form("play"), &snapshot, Some(1), now()));
        assert!(errors.contains(&ValidationError::DuplicateTitle));
    }

    #[test]
    fn test_due_date_boundaries() {
        let mut past = form("Past due");
        past.due_date = (now() - Duration::seconds(1)).to_rfc3339();
        let errors = errors_of(validate_todo(&past, &Snapshot::default(), None, now()));
        assert_eq!(errors.get(Field::DueDate), Some(&ValidationError::DueDateInPast));

        let mut future = form("Future due");
        future.due_date = (now() + Duration::seconds(1)).to_rfc3339();
        let draft = validate_todo(&future, &Snapshot::default(), None, now()).unwrap();
        assert_eq!(draft.due_date, Some(now() + Duration::seconds(1)));

        let mut exact = form("Due right now");
        exact.due_date = now().to_rfc3339();
        assert!(validate_todo(&exact, &Snapshot::default(), None, now()).is_ok());
    }

    #[rstest]
    #[case("2025-02-01T09:30", Some((2025, 2, 1, 9, 30, 0)))]
    #[case("2025-02-01T09:30:15", Some((2025, 2, 1, 9, 30, 15)))]
    #[case("2025-02-01 09:30", Some((2025, 2, 1, 9, 30, 0)))]
    #[case("2025-02-01", Some((2025, 2, 1, 0, 0, 0)))]
    #[case("2025-02-01T10:30:00+01:00", Some((2025, 2, 1, 9, 30, 0)))]
    #[case("", None)]
    fn test_parse_due_date_formats(
        #[case] raw: &str,
        #[case] expected: Option<(i32, u32, u32, u32, u32, u32)>,
    ) {
        let expected = expected
            .map(|(y, mo, d, h, mi, s)| Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap());
        assert_eq!(parse_due_date(raw), Ok(expected));
    }

    #[test]
    fn test_unparseable_due_date_is_rejected() {
        assert_eq!(parse_due_date("next tuesday"), Err(ValidationError::InvalidDueDate));
    }

    #[test]
    fn test_every_invalid_field_is_reported() {
        let snapshot = Snapshot::default();
        let submission = TodoForm {
            title: "ab".to_string(),
            due_date: "2020-01-01T00:00".to_string(),
            category: "7".to_string(),
            tags: vec!["3".to_string()],
            ..TodoForm::default()
        };
        let errors = errors_of(validate_todo(&submission, &snapshot, None, now()));
        assert_eq!(errors.len(), 4);
        assert_eq!(errors.get(Field::Title), Some(&ValidationError::TitleTooShort));
        assert_eq!(errors.get(Field::DueDate), Some(&ValidationError::DueDateInPast));
        assert_eq!(errors.get(Field::Category), Some(&ValidationError::UnknownCategory));
        assert_eq!(
            errors.get(Field::Tags),
            Some(&ValidationError::UnknownTag("3".to_string()))
        );
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let draft = validate_todo(&form("Just a title"), &Snapshot::default(), None, now()).unwrap();
        assert_eq!(draft.description, "");
        assert_eq!(draft.due_date, None);
        assert_eq!(draft.category_id, None);
        assert!(draft.tag_ids.is_empty());
        assert!(!draft.is_resolved);
    }

    #[test]
    fn test_known_category_and_tags_are_kept_once() {
        let snapshot = Snapshot {
            categories: vec![4],
            tags: vec![1, 2],
            ..Snapshot::default()
        };
        let submission = TodoForm {
            title: "Tagged".to_string(),
            category: "4".to_string(),
            tags: vec!["2".to_string(), "1".to_string(), "2".to_string()],
            is_resolved: true,
            ..TodoForm::default()
        };
        let draft = validate_todo(&submission, &snapshot, None, now()).unwrap();
        assert_eq!(draft.category_id, Some(4));
        assert_eq!(draft.tag_ids, vec![2, 1]);
        assert!(draft.is_resolved);
    }

    #[test]
    fn test_urlencoded_form_collects_repeated_tags() {
        let submission = TodoForm::from_urlencoded(
            b"title=Plan+trip&description=Book%20hotel&due_date=&category=2&tags=1&tags=3&is_resolved=on",
        );
        assert_eq!(submission.title, "Plan trip");
        assert_eq!(submission.description, "Book hotel");
        assert_eq!(submission.category, "2");
        assert_eq!(submission.tags, vec!["1", "3"]);
        assert!(submission.is_resolved);

        let unchecked = TodoForm::from_urlencoded(b"title=Plan+trip");
        assert!(!unchecked.is_resolved);
    }

    #[test]
    fn test_prefilled_due_date_reads_back_unchanged() {
        let due_date = Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 45).unwrap();
        let todo = Todo {
            id: 1,
            title: "Call bank".to_string(),
            description: String::new(),
            due_date: Some(due_date),
            is_resolved: false,
            category: None,
            tags: Vec::new(),
            created_at: now(),
            updated_at: now(),
        };

        let prefilled = TodoForm::from_todo(&todo);
        assert_eq!(prefilled.due_date, "2025-03-10T09:30:45");
        assert_eq!(parse_due_date(&prefilled.due_date), Ok(Some(due_date)));
    }

    #[test]
    fn test_field_errors_keep_first_error_per_field() {
        let mut errors = FieldErrors::new();
        errors.push(ValidationError::TitleTooShort);
        errors.push(ValidationError::DuplicateTitle);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.to_string(), "title: Title must be at least 3 characters long.");
    }
}
