use super::{row_exists, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Bsc, Category, SaveBscPayload, SaveCategoryPayload};
use crate::policy::normalize_text;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;

impl Database {
    pub fn save_category(&self, payload: &SaveCategoryPayload) -> AppResult<Category> {
        let name = payload.name.trim().to_string();
        let description = normalize_text(payload.description.clone());

        let conn = self.lock()?;
        let id = match payload.id {
            Some(id) => {
                let updated = conn.execute(
                    "UPDATE categories SET name = ?1, description = ?2 WHERE id = ?3",
                    params![name, description, id],
                )?;
                if updated == 0 {
                    return Err(AppError::NotFound(format!("category {id} not found")));
                }
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO categories (name, description) VALUES (?1, ?2)",
                    params![name, description],
                )?;
                conn.last_insert_rowid()
            }
        };

        load_category(&conn, id)?.ok_or_else(|| AppError::Internal(format!("category {id} vanished after save")))
    }

    pub fn get_category(&self, id: i64) -> AppResult<Option<Category>> {
        let conn = self.lock()?;
        load_category(&conn, id)
    }

    pub fn list_categories(&self) -> AppResult<Vec<Category>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, description FROM categories ORDER BY name, id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, description)| {
                Ok(Category {
                    bsc_ids: bsc_ids_for(&conn, id)?,
                    id,
                    name,
                    description,
                })
            })
            .collect()
    }

    /// Links to indicators and scorecards go with it; indicators stay.
    pub fn delete_category(&self, id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn save_bsc(&self, payload: &SaveBscPayload) -> AppResult<Bsc> {
        let name = payload.name.trim().to_string();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = match payload.id {
            Some(id) => {
                let updated = tx.execute("UPDATE bscs SET name = ?1 WHERE id = ?2", params![name, id])?;
                if updated == 0 {
                    return Err(AppError::NotFound(format!("scorecard {id} not found")));
                }
                id
            }
            None => {
                tx.execute("INSERT INTO bscs (name) VALUES (?1)", params![name])?;
                tx.last_insert_rowid()
            }
        };

        if let Some(category_ids) = &payload.category_ids {
            let unique: BTreeSet<i64> = category_ids.iter().copied().collect();
            for &category_id in &unique {
                if !row_exists(&tx, "categories", category_id)? {
                    return Err(AppError::Validation(format!("category {category_id} does not exist")));
                }
            }
            tx.execute("DELETE FROM bsc_categories WHERE bsc_id = ?1", params![id])?;
            for category_id in unique {
                tx.execute(
                    "INSERT INTO bsc_categories (bsc_id, category_id) VALUES (?1, ?2)",
                    params![id, category_id],
                )?;
            }
        }
        tx.commit()?;

        load_bsc(&conn, id)?.ok_or_else(|| AppError::Internal(format!("scorecard {id} vanished after save")))
    }

    pub fn get_bsc(&self, id: i64) -> AppResult<Option<Bsc>> {
        let conn = self.lock()?;
        load_bsc(&conn, id)
    }

    pub fn list_bscs(&self) -> AppResult<Vec<Bsc>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM bscs ORDER BY name, id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bsc) = load_bsc(&conn, id)? {
                result.push(bsc);
            }
        }
        Ok(result)
    }

    pub fn delete_bsc(&self, id: i64) -> AppResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM bscs WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

fn load_category(conn: &Connection, id: i64) -> AppResult<Option<Category>> {
    let row = conn
        .query_row(
            "SELECT name, description FROM categories WHERE id = ?1",
            params![id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;

    match row {
        Some((name, description)) => Ok(Some(Category {
            id,
            name,
            description,
            bsc_ids: bsc_ids_for(conn, id)?,
        })),
        None => Ok(None),
    }
}

fn bsc_ids_for(conn: &Connection, category_id: i64) -> AppResult<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT bsc_id FROM bsc_categories WHERE category_id = ?1 ORDER BY bsc_id")?;
    let rows = stmt.query_map(params![category_id], |row| row.get::<_, i64>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_bsc(conn: &Connection, id: i64) -> AppResult<Option<Bsc>> {
    let name: Option<String> = conn
        .query_row("SELECT name FROM bscs WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    let Some(name) = name else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT c.id FROM bsc_categories bc
         JOIN categories c ON c.id = bc.category_id
         WHERE bc.bsc_id = ?1
         ORDER BY c.name, c.id",
    )?;
    let category_ids = stmt
        .query_map(params![id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut categories = Vec::with_capacity(category_ids.len());
    for category_id in category_ids {
        if let Some(category) = load_category(conn, category_id)? {
            categories.push(category);
        }
    }
    Ok(Some(Bsc { id, name, categories }))
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::{SaveBscPayload, SaveCategoryPayload, SaveIndicatorPayload};

    fn category(db: &Database, name: &str) -> i64 {
        db.save_category(&SaveCategoryPayload {
            name: name.to_string(),
            ..SaveCategoryPayload::default()
        })
        .expect("category")
        .id
    }

    #[test]
    fn scorecard_groups_categories_and_categories_list_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let people = category(&db, "People");
        let finance = category(&db, "Finance");

        let bsc = db
            .save_bsc(&SaveBscPayload {
                name: " Company 2025 ".to_string(),
                category_ids: Some(vec![people, finance]),
                ..SaveBscPayload::default()
            })
            .expect("bsc");
        assert_eq!(bsc.name, "Company 2025");
        let names: Vec<&str> = bsc.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Finance", "People"]);

        let categories = db.list_categories().expect("list");
        assert_eq!(categories[0].name, "Finance");
        assert_eq!(categories[0].bsc_ids, vec![bsc.id]);
    }

    #[test]
    fn updating_a_scorecard_without_categories_keeps_links() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let finance = category(&db, "Finance");
        let bsc = db
            .save_bsc(&SaveBscPayload {
                name: "Q".to_string(),
                category_ids: Some(vec![finance]),
                ..SaveBscPayload::default()
            })
            .expect("bsc");
        let renamed = db
            .save_bsc(&SaveBscPayload {
                id: Some(bsc.id),
                name: "Quarterly".to_string(),
                category_ids: None,
            })
            .expect("rename");
        assert_eq!(renamed.categories.len(), 1);

        let err = db
            .save_bsc(&SaveBscPayload {
                id: Some(bsc.id),
                name: "Quarterly".to_string(),
                category_ids: Some(vec![finance, 404]),
            })
            .expect_err("unknown category");
        assert!(err.to_string().starts_with("VALIDATION:"));
        assert_eq!(db.get_bsc(bsc.id).expect("get").expect("bsc").name, "Quarterly");
    }

    #[test]
    fn deleting_a_category_unlinks_but_keeps_indicators() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let finance = category(&db, "Finance");
        let indicator = db
            .save_indicator(&SaveIndicatorPayload {
                category_ids: Some(vec![finance]),
                ..SaveIndicatorPayload::default()
            })
            .expect("indicator");

        assert!(db.delete_category(finance).expect("delete"));
        assert!(!db.delete_category(finance).expect("delete again"));
        let kept = db.get_indicator(indicator.id).expect("get").expect("indicator");
        assert!(kept.category_ids.is_empty());
    }

    #[test]
    fn saving_a_missing_category_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        let err = db
            .save_category(&SaveCategoryPayload {
                id: Some(9),
                name: "Ghost".to_string(),
                description: None,
            })
            .expect_err("missing");
        assert!(err.to_string().starts_with("NOT_FOUND:"));
    }
}
