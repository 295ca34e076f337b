//! HTTP surface: the router, shared state, and one handler per page.

use std::sync::Arc;

use axum::{
    extract::{Path, RawForm, RawQuery, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rusqlite::Connection;
use tower_http::trace::TraceLayer;

use crate::actions::{self, ActionError, Change, FormChoices};
use crate::database::Database;
use crate::error::AppError;
use crate::model::{Clock, Todo};
use crate::query::ListParams;
use crate::render::{FormMode, Renderer};
use crate::validation::{FieldErrors, TodoForm};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub renderer: Arc<Renderer>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> tera::Result<Self> {
        Ok(Self {
            db,
            renderer: Arc::new(Renderer::new()?),
            clock,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/health", get(health))
        .route("/create/", get(create_form).post(create))
        .route("/:id/", get(detail))
        .route("/:id/update/", get(update_form).post(update))
        .route("/:id/delete/", get(confirm_delete).post(delete))
        .route("/:id/toggle/", post(toggle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Carries one success message across the redirect to the list page.
pub const FLASH_COOKIE: &str = "todo_flash";

fn flash_cookie(value: String) -> Cookie<'static> {
    Cookie::build((FLASH_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn redirect_to_list(jar: CookieJar, message: &str) -> Response {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    (
        StatusCode::FOUND,
        jar.add(flash_cookie(encoded)),
        [(header::LOCATION, "/")],
    )
        .into_response()
}

/// Takes the pending message, if any, and expires the cookie.
fn take_flash(jar: CookieJar) -> (CookieJar, Option<String>) {
    let message = jar.get(FLASH_COOKIE).map(|cookie| {
        url::form_urlencoded::parse(cookie.value().as_bytes())
            .map(|(text, _)| text.into_owned())
            .collect::<String>()
    });
    if message.is_some() {
        (jar.remove(flash_cookie(String::new())), message)
    } else {
        (jar, message)
    }
}

/// Ids that are not integers cannot name a todo.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::not_found(format!("No TODO with id {raw}.")))
}

/// Result of a create or update submission.
enum Submission {
    Saved(Todo),
    Rejected {
        errors: FieldErrors,
        choices: FormChoices,
    },
}

fn settle(conn: &Connection, result: Result<Todo, ActionError>) -> Result<Submission, ActionError> {
    match result {
        Ok(todo) => Ok(Submission::Saved(todo)),
        Err(ActionError::Invalid(errors)) => Ok(Submission::Rejected {
            errors,
            choices: actions::form_choices(conn)?,
        }),
        Err(error) => Err(error),
    }
}

fn respond(
    state: &AppState,
    jar: CookieJar,
    mode: FormMode,
    form: &TodoForm,
    submission: Submission,
) -> Result<Response, AppError> {
    match submission {
        Submission::Saved(todo) => {
            let change = match mode {
                FormMode::Create => Change::Created,
                FormMode::Update(_) => Change::Updated,
            };
            Ok(redirect_to_list(jar, &change.message(&todo.title)))
        }
        Submission::Rejected { errors, choices } => {
            let body = state.renderer.form_page(mode, form, &errors, &choices)?;
            Ok(Html(body).into_response())
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn list(
    State(state): State<AppState>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Result<(CookieJar, Html<String>), AppError> {
    let params = ListParams::from_query(query.as_deref().unwrap_or_default());
    let now = state.clock.now();
    let listing = state
        .db
        .call(move |conn| actions::list_todos(conn, &params, now))
        .await?;
    let (jar, flash) = take_flash(jar);
    let body = state.renderer.list_page(&listing, now, flash.as_deref())?;
    Ok((jar, Html(body)))
}

async fn detail(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let todo_id = parse_id(&raw_id)?;
    let now = state.clock.now();
    let detail = state
        .db
        .call(move |conn| actions::todo_detail(conn, todo_id, now))
        .await?;
    Ok(Html(state.renderer.detail_page(&detail)?))
}

async fn create_form(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let choices = state.db.call(|conn| actions::form_choices(conn)).await?;
    let body = state.renderer.form_page(
        FormMode::Create,
        &TodoForm::default(),
        &FieldErrors::new(),
        &choices,
    )?;
    Ok(Html(body))
}

async fn create(
    State(state): State<AppState>,
    jar: CookieJar,
    RawForm(body): RawForm,
) -> Result<Response, AppError> {
    let form = TodoForm::from_urlencoded(&body);
    let now = state.clock.now();
    let submitted = form.clone();
    let submission = state
        .db
        .call(move |conn| {
            let result = actions::create_todo(conn, &submitted, now);
            settle(conn, result)
        })
        .await?;
    respond(&state, jar, FormMode::Create, &form, submission)
}

async fn update_form(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let todo_id = parse_id(&raw_id)?;
    let now = state.clock.now();
    let (detail, choices) = state
        .db
        .call(move |conn| {
            let detail = actions::todo_detail(conn, todo_id, now)?;
            Ok::<_, ActionError>((detail, actions::form_choices(conn)?))
        })
        .await?;
    let body = state.renderer.form_page(
        FormMode::Update(todo_id),
        &TodoForm::from_todo(&detail.todo),
        &FieldErrors::new(),
        &choices,
    )?;
    Ok(Html(body))
}

async fn update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    jar: CookieJar,
    RawForm(body): RawForm,
) -> Result<Response, AppError> {
    let todo_id = parse_id(&raw_id)?;
    let form = TodoForm::from_urlencoded(&body);
    let now = state.clock.now();
    let submitted = form.clone();
    let submission = state
        .db
        .call(move |conn| {
            let result = actions::update_todo(conn, todo_id, &submitted, now);
            settle(conn, result)
        })
        .await?;
    respond(&state, jar, FormMode::Update(todo_id), &form, submission)
}

async fn confirm_delete(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let todo_id = parse_id(&raw_id)?;
    let now = state.clock.now();
    let detail = state
        .db
        .call(move |conn| actions::todo_detail(conn, todo_id, now))
        .await?;
    Ok(Html(state.renderer.confirm_delete_page(&detail.todo)?))
}

async fn delete(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let todo_id = parse_id(&raw_id)?;
    let todo = state
        .db
        .call(move |conn| actions::delete_todo(conn, todo_id))
        .await?;
    Ok(redirect_to_list(jar, &Change::Deleted.message(&todo.title)))
}

async fn toggle(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let todo_id = parse_id(&raw_id)?;
    let now = state.clock.now();
    let todo = state
        .db
        .call(move |conn| actions::toggle_todo(conn, todo_id, now))
        .await?;
    let change = Change::toggled(todo.is_resolved);
    Ok(redirect_to_list(jar, &change.message(&todo.title)))
}
