use std::{env, net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::database::DatabaseError;
use crate::model::DEFAULT_CATEGORY_COLOR;

pub const DEFAULT_LOG_FILTER: &str = "todo_web=info,tower_http=info";
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Debug, Parser)]
#[command(name = "todo-web", version, about = "Track TODO items from the browser")]
pub struct Cli {
    /// SQLite file to use [default: ~/.todo/todo-web.sqlite]
    #[arg(long, env = "TODO_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Log filter, in `tracing_subscriber::EnvFilter` syntax
    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER, global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the web server (the default)
    Serve(ServeArgs),
    /// Manage categories
    Category {
        #[command(subcommand)]
        action: CategoryCommand,
    },
    /// Manage tags
    Tag {
        #[command(subcommand)]
        action: TagCommand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
pub struct ServeArgs {
    /// Address the web server listens on
    #[arg(long, env = "TODO_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CategoryCommand {
    Add {
        name: String,
        /// Hex color such as #007bff
        #[arg(long, default_value = DEFAULT_CATEGORY_COLOR, value_parser = parse_color)]
        color: String,
    },
    /// Delete a category; its todos are kept without a category
    Remove { name: String },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum TagCommand {
    Add {
        name: String,
        /// URL-safe identifier [default: derived from the name]
        #[arg(long)]
        slug: Option<String>,
    },
    /// Delete a tag and remove it from every todo
    Remove { name: String },
    List,
}

impl Cli {
    pub fn database_path(&self) -> Result<PathBuf, DatabaseError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }

    /// The subcommand to run; `serve` with its defaults when none was given.
    pub fn selected_command(&self) -> Result<Command, clap::Error> {
        match &self.command {
            Some(command) => Ok(command.clone()),
            None => Ok(Command::Serve(ServeArgs::try_parse_from(["serve"])?)),
        }
    }
}

fn default_database_path() -> Result<PathBuf, DatabaseError> {
    let home_dir: PathBuf = env::var_os("HOME")
        .map(Into::into)
        .ok_or(DatabaseError::NoHomeDirectory)?;
    Ok(home_dir.join(".todo").join("todo-web.sqlite"))
}

/// `#` followed by six hex digits.
pub fn parse_color(raw: &str) -> Result<String, String> {
    let digits = raw
        .strip_prefix('#')
        .ok_or_else(|| format!("`{raw}` must start with '#'"))?;
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("`{raw}` must be '#' followed by six hex digits"));
    }
    Ok(raw.to_ascii_lowercase())
}
