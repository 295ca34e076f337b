//! One function per user intent. Each takes the connection and the single
//! `now` of the request; writes run inside one immediate transaction.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::database::{self, DatabaseError};
use crate::model::{Category, Tag, Todo};
use crate::query::{self, ListParams, TodoListing};
use crate::validation::{self, FieldErrors, Rejection, TodoForm, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("todo {0} not found")]
    NotFound(i64),
    #[error("invalid submission: {0}")]
    Invalid(FieldErrors),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<Rejection> for ActionError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Invalid(errors) => ActionError::Invalid(errors),
            Rejection::Database(error) => ActionError::Database(error),
        }
    }
}

impl From<rusqlite::Error> for ActionError {
    fn from(error: rusqlite::Error) -> Self {
        ActionError::Database(error.into())
    }
}

/// A unique-index hit on write means another writer took the title first.
fn duplicate_title_or(error: DatabaseError) -> ActionError {
    if error.is_unique_violation() {
        ActionError::Invalid(FieldErrors::single(ValidationError::DuplicateTitle))
    } else {
        ActionError::Database(error)
    }
}

/// A completed write, named for the message shown after the redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Deleted,
    Resolved,
    Reopened,
}

impl Change {
    pub fn toggled(is_resolved: bool) -> Self {
        if is_resolved {
            Change::Resolved
        } else {
            Change::Reopened
        }
    }

    pub fn message(self, title: &str) -> String {
        let outcome = match self {
            Change::Created => "created successfully",
            Change::Updated => "updated successfully",
            Change::Deleted => "deleted successfully",
            Change::Resolved => "resolved",
            Change::Reopened => "reopened",
        };
        format!("TODO \"{title}\" {outcome}!")
    }
}

#[derive(Debug, Clone)]
pub struct TodoDetail {
    pub todo: Todo,
    pub is_overdue: bool,
}

/// Choices offered by the create and update forms.
#[derive(Debug, Clone, Default)]
pub struct FormChoices {
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
}

pub fn form_choices(conn: &Connection) -> Result<FormChoices, ActionError> {
    Ok(FormChoices {
        categories: database::fetch_categories(conn)?,
        tags: database::fetch_tags(conn)?,
    })
}

pub fn list_todos(
    conn: &Connection,
    params: &ListParams,
    now: DateTime<Utc>,
) -> Result<TodoListing, ActionError> {
    let todos = database::fetch_todos(conn)?;
    let categories = database::fetch_categories(conn)?;
    Ok(query::compose(todos, categories, params, now))
}

pub fn todo_detail(
    conn: &Connection,
    todo_id: i64,
    now: DateTime<Utc>,
) -> Result<TodoDetail, ActionError> {
    let todo = database::fetch_todo(conn, todo_id)?.ok_or(ActionError::NotFound(todo_id))?;
    let is_overdue = todo.is_overdue(now);
    Ok(TodoDetail { todo, is_overdue })
}

pub fn create_todo(
    conn: &mut Connection,
    form: &TodoForm,
    now: DateTime<Utc>,
) -> Result<Todo, ActionError> {
    let tx = database::write_transaction(conn)?;
    let draft = validation::validate_todo(form, &*tx, None, now)?;
    let todo_id = database::add_todo(&tx, &draft, now).map_err(duplicate_title_or)?;
    let todo = database::fetch_todo(&tx, todo_id)?.ok_or(ActionError::NotFound(todo_id))?;
    tx.commit()?;

    tracing::info!(todo_id, "{}", Change::Created.message(&todo.title));
    Ok(todo)
}

pub fn update_todo(
    conn: &mut Connection,
    todo_id: i64,
    form: &TodoForm,
    now: DateTime<Utc>,
) -> Result<Todo, ActionError> {
    let tx = database::write_transaction(conn)?;
    if database::fetch_todo(&tx, todo_id)?.is_none() {
        return Err(ActionError::NotFound(todo_id));
    }
    let draft = validation::validate_todo(form, &*tx, Some(todo_id), now)?;
    database::update_todo(&tx, todo_id, &draft, now).map_err(duplicate_title_or)?;
    let todo = database::fetch_todo(&tx, todo_id)?.ok_or(ActionError::NotFound(todo_id))?;
    tx.commit()?;

    tracing::info!(todo_id, "{}", Change::Updated.message(&todo.title));
    Ok(todo)
}

/// Returns the deleted todo as it was just before removal.
pub fn delete_todo(conn: &mut Connection, todo_id: i64) -> Result<Todo, ActionError> {
    let tx = database::write_transaction(conn)?;
    let todo = database::fetch_todo(&tx, todo_id)?.ok_or(ActionError::NotFound(todo_id))?;
    database::delete_todo(&tx, todo_id)?;
    tx.commit()?;

    tracing::info!(todo_id, "{}", Change::Deleted.message(&todo.title));
    Ok(todo)
}

pub fn toggle_todo(
    conn: &mut Connection,
    todo_id: i64,
    now: DateTime<Utc>,
) -> Result<Todo, ActionError> {
    let tx = database::write_transaction(conn)?;
    if !database::toggle_todo_completion(&tx, todo_id, now)? {
        return Err(ActionError::NotFound(todo_id));
    }
    let todo = database::fetch_todo(&tx, todo_id)?.ok_or(ActionError::NotFound(todo_id))?;
    tx.commit()?;

    tracing::info!(todo_id, "{}", Change::toggled(todo.is_resolved).message(&todo.title));
    Ok(todo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn form(title: &str) -> TodoForm {
        TodoForm {
            title: title.to_string(),
            ..TodoForm::default()
        }
    }

    #[test]
    fn test_change_messages() {
        assert_eq!(
            Change::Created.message("Buy milk"),
            "TODO \"Buy milk\" created successfully!"
        );
        assert_eq!(Change::toggled(true).message("x"), "TODO \"x\" resolved!");
        assert_eq!(Change::toggled(false).message("x"), "TODO \"x\" reopened!");
    }

    fn invalid(result: Result<Todo, ActionError>) -> FieldErrors {
        match result {
            Err(ActionError::Invalid(errors)) => errors,
            other => panic!("expected field errors, got {other:?}"),
        }
    }

    fn fresh() -> Connection {
        database::open_db(std::path::Path::new(":memory:")).unwrap()
    }

    #[test]
    fn test_create_sets_timestamps_and_trims_title() {
        let mut conn = fresh();
        let todo = create_todo(&mut conn, &form("  Buy milk  "), now()).unwrap();
        assert_eq!(todo.title, "Buy milk");
        assert_eq!(todo.created_at, now());
        assert_eq!(todo.updated_at, now());
        assert!(!todo.is_resolved);
    }

    #[test]
    fn test_create_rejects_case_insensitive_duplicate() {
        let mut conn = fresh();
        create_todo(&mut conn, &form("Work"), now()).unwrap();
        let errors = invalid(create_todo(&mut conn, &form("WORK"), now()));
        assert!(errors.contains(&ValidationError::DuplicateTitle));
        assert_eq!(database::fetch_todos(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_create_with_past_due_date_persists_nothing() {
        let mut conn = fresh();
        let mut submission = form("Too late");
        submission.due_date = (now() - Duration::seconds(1)).to_rfc3339();
        let errors = invalid(create_todo(&mut conn, &submission, now()));
        assert!(errors.contains(&ValidationError::DueDateInPast));
        assert!(database::fetch_todos(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_detail_reports_overdue_against_request_time() {
        let mut conn = fresh();
        let mut submission = form("Renew passport");
        submission.due_date = (now() + Duration::hours(1)).to_rfc3339();
        let todo = create_todo(&mut conn, &submission, now()).unwrap();

        assert!(!todo_detail(&conn, todo.id, now()).unwrap().is_overdue);
        let later = now() + Duration::hours(2);
        assert!(todo_detail(&conn, todo.id, later).unwrap().is_overdue);
    }

    #[test]
    fn test_detail_of_unknown_id_is_not_found() {
        let conn = fresh();
        assert!(matches!(todo_detail(&conn, 9, now()), Err(ActionError::NotFound(9))));
    }

    #[test]
    fn test_update_keeps_own_title_and_refreshes_updated_at() {
        let mut conn = fresh();
        let todo = create_todo(&mut conn, &form("Water plants"), now()).unwrap();

        let later = now() + Duration::minutes(10);
        let mut submission = form("Water plants");
        submission.description = "Balcony too".to_string();
        let updated = update_todo(&mut conn, todo.id, &submission, later).unwrap();

        assert_eq!(updated.description, "Balcony too");
        assert_eq!(updated.created_at, now());
        assert_eq!(updated.updated_at, later);
    }

    #[test]
    fn test_update_rejects_title_of_another_todo() {
        let mut conn = fresh();
        create_todo(&mut conn, &form("First"), now()).unwrap();
        let second = create_todo(&mut conn, &form("Second"), now()).unwrap();

        let errors = invalid(update_todo(&mut conn, second.id, &form("first"), now()));
        assert!(errors.contains(&ValidationError::DuplicateTitle));
        let unchanged = todo_detail(&conn, second.id, now()).unwrap().todo;
        assert_eq!(unchanged, second);
    }

    #[test]
    fn test_update_unknown_id_is_not_found_before_validation() {
        let mut conn = fresh();
        let result = update_todo(&mut conn, 77, &form(""), now());
        assert!(matches!(result, Err(ActionError::NotFound(77))));
    }

    #[test]
    fn test_toggle_twice_restores_state() {
        let mut conn = fresh();
        let todo = create_todo(&mut conn, &form("Stretch"), now()).unwrap();

        let later = now() + Duration::seconds(30);
        let toggled = toggle_todo(&mut conn, todo.id, later).unwrap();
        assert!(toggled.is_resolved);
        assert_eq!(toggled.updated_at, later);

        let restored = toggle_todo(&mut conn, todo.id, later).unwrap();
        assert!(!restored.is_resolved);
    }

    #[test]
    fn test_toggle_and_delete_unknown_id_are_not_found() {
        let mut conn = fresh();
        assert!(matches!(toggle_todo(&mut conn, 5, now()), Err(ActionError::NotFound(5))));
        assert!(matches!(delete_todo(&mut conn, 5), Err(ActionError::NotFound(5))));
    }

    #[test]
    fn test_delete_removes_todo_permanently() {
        let mut conn = fresh();
        let todo = create_todo(&mut conn, &form("Old chore"), now()).unwrap();
        let deleted = delete_todo(&mut conn, todo.id).unwrap();
        assert_eq!(deleted.title, "Old chore");
        assert!(matches!(todo_detail(&conn, todo.id, now()), Err(ActionError::NotFound(_))));
    }

    #[test]
    fn test_list_counts_cover_everything() {
        let mut conn = fresh();
        create_todo(&mut conn, &form("Open one"), now()).unwrap();
        let done = create_todo(&mut conn, &form("Closed one"), now()).unwrap();
        toggle_todo(&mut conn, done.id, now()).unwrap();

        let params = ListParams {
            filter: Some("resolved".to_string()),
            ..ListParams::default()
        };
        let listing = list_todos(&conn, &params, now()).unwrap();
        assert_eq!(listing.todos.len(), 1);
        assert_eq!(listing.stats.total_count, 2);
        assert_eq!(listing.stats.active_count, 1);
        assert_eq!(listing.stats.resolved_count, 1);
    }

    #[test]
    fn test_deleting_category_keeps_todo() {
        let mut conn = fresh();
        let category_id = database::add_category(&conn, "Garden", "#00aa00", now()).unwrap();
        let mut submission = form("Mow lawn");
        submission.category = category_id.to_string();
        let todo = create_todo(&mut conn, &submission, now()).unwrap();
        assert_eq!(todo.category_id(), Some(category_id));

        database::delete_category(&conn, category_id).unwrap();

        let detail = todo_detail(&conn, todo.id, now()).unwrap();
        assert_eq!(detail.todo.category, None);
    }

    #[test]
    fn test_concurrent_creates_with_same_title_admit_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todos.sqlite");
        database::open_db(&path).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut conn = database::open_db(&path).unwrap();
                    create_todo(&mut conn, &form("Race"), now())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.into_iter().filter(Result::is_err) {
            let errors = invalid(result);
            assert!(errors.contains(&ValidationError::DuplicateTitle));
        }
        let conn = database::open_db(&path).unwrap();
        assert_eq!(database::fetch_todos(&conn).unwrap().len(), 1);
    }
}
