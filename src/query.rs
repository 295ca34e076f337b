//! The list view: state filter, search, category filter, sort, paginate.
//!
//! [`compose`] is a pure function of the todo collection, the request
//! parameters and the request's `now`. Aggregate counts always cover the
//! whole collection, whatever the parameters narrow the page down to.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Category, Todo};

pub const PAGE_SIZE: usize = 10;
pub const DEFAULT_SORT: &str = "-created_at";

/// Query string of the list page. Every value is optional and kept as text
/// so malformed input degrades to a default instead of a rejection.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub filter: Option<String>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
}

impl ListParams {
    /// Parses a raw query string. A repeated key keeps its last value and
    /// unknown keys are ignored.
    pub fn from_query(query: &str) -> Self {
        let mut params = ListParams::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "filter" => &mut params.filter,
                "search" => &mut params.search,
                "category" => &mut params.category,
                "sort" => &mut params.sort,
                "page" => &mut params.page,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    #[default]
    All,
    Active,
    Resolved,
    Overdue,
}

impl StateFilter {
    /// Unrecognized values mean no filtering.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => StateFilter::Active,
            "resolved" => StateFilter::Resolved,
            "overdue" => StateFilter::Overdue,
            _ => StateFilter::All,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StateFilter::All => "all",
            StateFilter::Active => "active",
            StateFilter::Resolved => "resolved",
            StateFilter::Overdue => "overdue",
        }
    }

    pub fn matches(self, todo: &Todo, now: DateTime<Utc>) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Active => !todo.is_resolved,
            StateFilter::Resolved => todo.is_resolved,
            StateFilter::Overdue => todo.is_overdue(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Title,
    Description,
    DueDate,
    IsResolved,
    Category,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    fn parse(raw: &str) -> Option<Self> {
        let field = match raw {
            "id" => SortField::Id,
            "title" => SortField::Title,
            "description" => SortField::Description,
            "due_date" => SortField::DueDate,
            "is_resolved" => SortField::IsResolved,
            "category" => SortField::Category,
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            _ => return None,
        };
        Some(field)
    }

    fn as_str(self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Title => "title",
            SortField::Description => "description",
            SortField::DueDate => "due_date",
            SortField::IsResolved => "is_resolved",
            SortField::Category => "category",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        }
    }

    /// Absent values order before present ones.
    fn compare(self, a: &Todo, b: &Todo) -> Ordering {
        match self {
            SortField::Id => a.id.cmp(&b.id),
            SortField::Title => a.title.cmp(&b.title),
            SortField::Description => a.description.cmp(&b.description),
            SortField::DueDate => a.due_date.cmp(&b.due_date),
            SortField::IsResolved => a.is_resolved.cmp(&b.is_resolved),
            SortField::Category => {
                let name = |todo: &Todo| todo.category.as_ref().map(|c| c.name.clone());
                name(a).cmp(&name(b))
            }
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub field: SortField,
    pub descending: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder {
            field: SortField::CreatedAt,
            descending: true,
        }
    }
}

impl SortOrder {
    /// `field` or `-field`; anything unknown falls back to `-created_at`.
    pub fn parse(raw: &str) -> Self {
        let (descending, name) = match raw.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, raw),
        };
        match SortField::parse(name) {
            Some(field) => SortOrder { field, descending },
            None => SortOrder::default(),
        }
    }

    pub fn as_param(self) -> String {
        if self.descending {
            format!("-{}", self.field.as_str())
        } else {
            self.field.as_str().to_string()
        }
    }

    /// Total order: ties fall back to ascending id.
    pub fn compare(self, a: &Todo, b: &Todo) -> Ordering {
        let ordering = self.field.compare(a, b);
        let ordering = if self.descending {
            ordering.reverse()
        } else {
            ordering
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_count: usize,
    pub active_count: usize,
    pub resolved_count: usize,
    pub overdue_count: usize,
}

impl Stats {
    pub fn of(todos: &[Todo], now: DateTime<Utc>) -> Self {
        let mut stats = Stats {
            total_count: todos.len(),
            ..Stats::default()
        };
        for todo in todos {
            if todo.is_resolved {
                stats.resolved_count += 1;
            } else {
                stats.active_count += 1;
            }
            if todo.is_overdue(now) {
                stats.overdue_count += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub todo_count: usize,
}

/// Counts todos per category, keeping the order of `categories`.
pub fn category_counts(todos: &[Todo], categories: Vec<Category>) -> Vec<CategoryCount> {
    categories
        .into_iter()
        .map(|category| {
            let todo_count = todos
                .iter()
                .filter(|todo| todo.category_id() == Some(category.id))
                .count();
            CategoryCount {
                category,
                todo_count,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    /// 1-indexed.
    pub number: usize,
    pub num_pages: usize,
    /// Matches across all pages.
    pub count: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

impl Page {
    /// Resolves the requested page: missing or non-numeric means the first
    /// page, `last` or anything past the end means the last one, and
    /// anything below 1 means the first.
    pub fn resolve(raw: Option<&str>, count: usize) -> Self {
        let num_pages = count.div_ceil(PAGE_SIZE).max(1);
        let number = match raw.map(str::trim) {
            Some("last") => num_pages,
            Some(raw) => match raw.parse::<i64>() {
                Ok(requested) if requested < 1 => 1,
                Ok(requested) => usize::try_from(requested).map_or(num_pages, |n| n.min(num_pages)),
                Err(_) => 1,
            },
            None => 1,
        };
        Page {
            number,
            num_pages,
            count,
            has_previous: number > 1,
            has_next: number < num_pages,
        }
    }

    fn offset(&self) -> usize {
        (self.number - 1) * PAGE_SIZE
    }
}

#[derive(Debug, Clone)]
pub struct TodoListing {
    pub todos: Vec<Todo>,
    pub page: Page,
    pub stats: Stats,
    pub categories: Vec<CategoryCount>,
    pub filter: StateFilter,
    pub search: String,
    pub category: Option<i64>,
    pub sort: SortOrder,
}

pub fn compose(
    todos: Vec<Todo>,
    categories: Vec<Category>,
    params: &ListParams,
    now: DateTime<Utc>,
) -> TodoListing {
    let stats = Stats::of(&todos, now);
    let categories = category_counts(&todos, categories);

    let filter = params
        .filter
        .as_deref()
        .map(StateFilter::parse)
        .unwrap_or_default();
    let search = params.search.clone().unwrap_or_default();
    let category = params
        .category
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok());
    let sort = params
        .sort
        .as_deref()
        .map(SortOrder::parse)
        .unwrap_or_default();

    let needle = search.to_lowercase();
    let mut matching: Vec<Todo> = todos
        .into_iter()
        .filter(|todo| filter.matches(todo, now))
        .filter(|todo| {
            needle.is_empty()
                || todo.title.to_lowercase().contains(&needle)
                || todo.description.to_lowercase().contains(&needle)
        })
        .filter(|todo| category.map_or(true, |id| todo.category_id() == Some(id)))
        .collect();

    matching.sort_by(|a, b| sort.compare(a, b));

    let page = Page::resolve(params.page.as_deref(), matching.len());
    let todos = matching
        .into_iter()
        .skip(page.offset())
        .take(PAGE_SIZE)
        .collect();

    TodoListing {
        todos,
        page,
        stats,
        categories,
        filter,
        search,
        category,
        sort,
    }
}
