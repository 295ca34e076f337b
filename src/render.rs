//! HTML pages, rendered with tera templates compiled into the binary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context, Tera};

use crate::actions::{FormChoices, TodoDetail};
use crate::model::Todo;
use crate::query::{Page, StateFilter, TodoListing};
use crate::validation::{Field, FieldErrors, TodoForm};

const DISPLAY_FORMAT: &str = "%b %d, %Y %H:%M";
const EXCERPT_LENGTH: usize = 80;

const SORT_OPTIONS: [(&str, &str); 6] = [
    ("-created_at", "Newest first"),
    ("created_at", "Oldest first"),
    ("due_date", "Due date"),
    ("-due_date", "Due date (latest first)"),
    ("title", "Title"),
    ("-updated_at", "Recently updated"),
];

fn display_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format(DISPLAY_FORMAT).to_string()
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LENGTH {
        return text.to_string();
    }
    let mut short: String = text.chars().take(EXCERPT_LENGTH - 1).collect();
    short.push('…');
    short
}

#[derive(Debug, Serialize)]
struct CategoryBadge {
    name: String,
    color: String,
}

#[derive(Debug, Serialize)]
struct TodoRow {
    id: i64,
    title: String,
    description: String,
    excerpt: String,
    due_date: Option<String>,
    is_resolved: bool,
    is_overdue: bool,
    category: Option<CategoryBadge>,
    tags: Vec<String>,
}

impl TodoRow {
    fn new(todo: &Todo, is_overdue: bool) -> Self {
        TodoRow {
            id: todo.id,
            title: todo.title.clone(),
            description: todo.description.clone(),
            excerpt: excerpt(&todo.description),
            due_date: todo.due_date.map(display_time),
            is_resolved: todo.is_resolved,
            is_overdue,
            category: todo.category.as_ref().map(|category| CategoryBadge {
                name: category.name.clone(),
                color: category.color.clone(),
            }),
            tags: todo.tags.iter().map(|tag| tag.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Link {
    label: &'static str,
    url: String,
    active: bool,
}

#[derive(Debug, Serialize)]
struct CategoryOption {
    id: i64,
    name: String,
    todo_count: usize,
    selected: bool,
}

#[derive(Debug, Serialize)]
struct SortOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Debug, Serialize)]
struct ListPage<'a> {
    todos: Vec<TodoRow>,
    stats: crate::query::Stats,
    categories: Vec<CategoryOption>,
    filter: &'static str,
    search: &'a str,
    sort: String,
    page: Page,
    filter_links: Vec<Link>,
    sort_options: Vec<SortOption>,
    previous_url: Option<String>,
    next_url: Option<String>,
    flash: Option<&'a str>,
}

/// Builds a list URL that keeps the current search, category and sort.
pub fn list_url(listing: &TodoListing, filter: StateFilter, page: Option<usize>) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if filter != StateFilter::All {
        query.append_pair("filter", filter.as_str());
    }
    if !listing.search.is_empty() {
        query.append_pair("search", &listing.search);
    }
    if let Some(category) = listing.category {
        query.append_pair("category", &category.to_string());
    }
    let sort = listing.sort.as_param();
    if sort != crate::query::DEFAULT_SORT {
        query.append_pair("sort", &sort);
    }
    if let Some(page) = page {
        query.append_pair("page", &page.to_string());
    }
    let query = query.finish();
    if query.is_empty() {
        "/".to_string()
    } else {
        format!("/?{query}")
    }
}

#[derive(Debug, Serialize)]
struct ChoiceOption {
    id: i64,
    name: String,
    selected: bool,
    checked: bool,
}

#[derive(Debug, Serialize)]
struct ErrorMessages {
    title: Option<String>,
    due_date: Option<String>,
    category: Option<String>,
    tags: Option<String>,
}

impl ErrorMessages {
    fn new(errors: &FieldErrors) -> Self {
        let message = |field| errors.get(field).map(ToString::to_string);
        ErrorMessages {
            title: message(Field::Title),
            due_date: message(Field::DueDate),
            category: message(Field::Category),
            tags: message(Field::Tags),
        }
    }
}

#[derive(Debug, Serialize)]
struct FormPage<'a> {
    action: &'static str,
    submit_url: String,
    form: &'a TodoForm,
    errors: ErrorMessages,
    categories: Vec<ChoiceOption>,
    tags: Vec<ChoiceOption>,
}

#[derive(Debug, Serialize)]
struct DetailPage {
    todo: TodoRow,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct ConfirmDeletePage<'a> {
    id: i64,
    title: &'a str,
}

/// Which form page is being shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Update(i64),
}

pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> tera::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("base.html", include_str!("../templates/base.html")),
            ("todo_list.html", include_str!("../templates/todo_list.html")),
            ("todo_form.html", include_str!("../templates/todo_form.html")),
            ("todo_detail.html", include_str!("../templates/todo_detail.html")),
            (
                "todo_confirm_delete.html",
                include_str!("../templates/todo_confirm_delete.html"),
            ),
        ])?;
        Ok(Self { tera })
    }

    fn render<T: Serialize>(&self, template: &str, page: &T) -> tera::Result<String> {
        self.tera.render(template, &Context::from_serialize(page)?)
    }

    /// `flash` is the one-shot message left by the write that redirected here.
    pub fn list_page(
        &self,
        listing: &TodoListing,
        now: DateTime<Utc>,
        flash: Option<&str>,
    ) -> tera::Result<String> {
        let filter_links = [
            (StateFilter::All, "All"),
            (StateFilter::Active, "Active"),
            (StateFilter::Resolved, "Resolved"),
            (StateFilter::Overdue, "Overdue"),
        ]
        .into_iter()
        .map(|(filter, label)| Link {
            label,
            url: list_url(listing, filter, None),
            active: filter == listing.filter,
        })
        .collect();

        let sort = listing.sort.as_param();
        let sort_options = SORT_OPTIONS
            .into_iter()
            .map(|(value, label)| SortOption {
                value,
                label,
                selected: value == sort,
            })
            .collect();

        let page = ListPage {
            todos: listing
                .todos
                .iter()
                .map(|todo| TodoRow::new(todo, todo.is_overdue(now)))
                .collect(),
            stats: listing.stats,
            categories: listing
                .categories
                .iter()
                .map(|entry| CategoryOption {
                    id: entry.category.id,
                    name: entry.category.name.clone(),
                    todo_count: entry.todo_count,
                    selected: listing.category == Some(entry.category.id),
                })
                .collect(),
            filter: listing.filter.as_str(),
            search: &listing.search,
            sort,
            page: listing.page,
            filter_links,
            sort_options,
            previous_url: listing
                .page
                .has_previous
                .then(|| list_url(listing, listing.filter, Some(listing.page.number - 1))),
            next_url: listing
                .page
                .has_next
                .then(|| list_url(listing, listing.filter, Some(listing.page.number + 1))),
            flash,
        };
        self.render("todo_list.html", &page)
    }

    pub fn form_page(
        &self,
        mode: FormMode,
        form: &TodoForm,
        errors: &FieldErrors,
        choices: &FormChoices,
    ) -> tera::Result<String> {
        let (action, submit_url) = match mode {
            FormMode::Create => ("Create", "/create/".to_string()),
            FormMode::Update(id) => ("Update", format!("/{id}/update/")),
        };
        let page = FormPage {
            action,
            submit_url,
            form,
            errors: ErrorMessages::new(errors),
            categories: choices
                .categories
                .iter()
                .map(|category| ChoiceOption {
                    id: category.id,
                    name: category.name.clone(),
                    selected: form.category.trim() == category.id.to_string(),
                    checked: false,
                })
                .collect(),
            tags: choices
                .tags
                .iter()
                .map(|tag| ChoiceOption {
                    id: tag.id,
                    name: tag.name.clone(),
                    selected: false,
                    checked: form.tags.iter().any(|raw| raw.trim() == tag.id.to_string()),
                })
                .collect(),
        };
        self.render("todo_form.html", &page)
    }

    pub fn detail_page(&self, detail: &TodoDetail) -> tera::Result<String> {
        let page = DetailPage {
            todo: TodoRow::new(&detail.todo, detail.is_overdue),
            created_at: display_time(detail.todo.created_at),
            updated_at: display_time(detail.todo.updated_at),
        };
        self.render("todo_detail.html", &page)
    }

    pub fn confirm_delete_page(&self, todo: &Todo) -> tera::Result<String> {
        self.render(
            "todo_confirm_delete.html",
            &ConfirmDeletePage {
                id: todo.id,
                title: &todo.title,
            },
        )
    }
}
