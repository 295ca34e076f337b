//! Category and tag management from the command line.

use std::io::Write;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::{CategoryCommand, TagCommand};
use crate::database::{self, DatabaseError};

fn already_exists(error: DatabaseError, what: &str, name: &str) -> anyhow::Error {
    if error.is_unique_violation() {
        anyhow::anyhow!("{what} \"{name}\" already exists")
    } else {
        error.into()
    }
}

pub fn run_category(
    conn: &mut Connection,
    command: CategoryCommand,
    now: DateTime<Utc>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        CategoryCommand::Add { name, color } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                bail!("category name cannot be empty");
            }
            let id = database::add_category(conn, &name, &color, now)
                .map_err(|e| already_exists(e, "category", &name))?;
            tracing::info!(category_id = id, %name, %color, "category added");
            writeln!(out, "{id}\t{name}\t{color}")?;
        }
        CategoryCommand::Remove { name } => {
            let tx = database::write_transaction(conn)?;
            let category = database::find_category_by_name(&tx, &name)?
                .with_context(|| format!("no category named \"{name}\""))?;
            database::delete_category(&tx, category.id)?;
            tx.commit()?;
            tracing::info!(category_id = category.id, %name, "category removed");
            writeln!(out, "removed {name}")?;
        }
        CategoryCommand::List => {
            for category in database::fetch_categories(conn)? {
                writeln!(out, "{}\t{}\t{}", category.id, category.name, category.color)?;
            }
        }
    }
    Ok(())
}

pub fn run_tag(conn: &mut Connection, command: TagCommand, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        TagCommand::Add { name, slug } => {
            let name = name.trim().to_string();
            let slug = slug.unwrap_or_else(|| slug::slugify(&name));
            if name.is_empty() || slug.is_empty() {
                bail!("tag name and slug cannot be empty");
            }
            let id = database::add_tag(conn, &name, &slug)
                .map_err(|e| already_exists(e, "tag", &name))?;
            tracing::info!(tag_id = id, %name, %slug, "tag added");
            writeln!(out, "{id}\t{name}\t{slug}")?;
        }
        TagCommand::Remove { name } => {
            let tx = database::write_transaction(conn)?;
            let tag = database::find_tag_by_name(&tx, &name)?
                .with_context(|| format!("no tag named \"{name}\""))?;
            database::delete_tag(&tx, tag.id)?;
            tx.commit()?;
            tracing::info!(tag_id = tag.id, %name, "tag removed");
            writeln!(out, "removed {name}")?;
        }
        TagCommand::List => {
            for tag in database::fetch_tags(conn)? {
                writeln!(out, "{}\t{}\t{}", tag.id, tag.name, tag.slug)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn run(conn: &mut Connection, command: CategoryCommand) -> anyhow::Result<String> {
        let mut out = Vec::new();
        run_category(conn, command, now(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_category_add_list_remove() {
        let mut conn = database::open_db(Path::new(":memory:")).unwrap();
        run(
            &mut conn,
            CategoryCommand::Add {
                name: "Work".to_string(),
                color: "#ff0000".to_string(),
            },
        )
        .unwrap();

        let listed = run(&mut conn, CategoryCommand::List).unwrap();
        assert_eq!(listed, "1\tWork\t#ff0000\n");

        run(&mut conn, CategoryCommand::Remove { name: "Work".to_string() }).unwrap();
        assert_eq!(run(&mut conn, CategoryCommand::List).unwrap(), "");
    }

    #[test]
    fn test_duplicate_category_is_reported() {
        let mut conn = database::open_db(Path::new(":memory:")).unwrap();
        let add = CategoryCommand::Add {
            name: "Home".to_string(),
            color: "#007bff".to_string(),
        };
        run(&mut conn, add.clone()).unwrap();
        let error = run(&mut conn, add).unwrap_err();
        assert_eq!(error.to_string(), "category \"Home\" already exists");
    }

    #[test]
    fn test_removing_unknown_category_fails() {
        let mut conn = database::open_db(Path::new(":memory:")).unwrap();
        assert!(run(&mut conn, CategoryCommand::Remove { name: "Nope".to_string() }).is_err());
    }

    #[test]
    fn test_tag_slug_is_derived_from_name() {
        let mut conn = database::open_db(Path::new(":memory:")).unwrap();
        let mut out = Vec::new();
        run_tag(
            &mut conn,
            TagCommand::Add {
                name: "Deep Work".to_string(),
                slug: None,
            },
            &mut out,
        )
        .unwrap();

        let tags = database::fetch_tags(&conn).unwrap();
        assert_eq!(tags[0].slug, "deep-work");
    }
}
