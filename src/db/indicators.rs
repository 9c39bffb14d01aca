//! Indicator rows, parent/child relations and the upward refresh that keeps
//! parents' derived values in step with their children.
//!
//! Every mutation runs inside one IMMEDIATE transaction: the write itself,
//! category links and the refresh of every affected ancestor either all
//! land or none do.

use super::{invalid_text, parse_time, row_exists, Database};
use crate::aggregation::{derive, needs_quarter_recalc, MONTH_KEYS};
use crate::errors::{AppError, AppResult};
use crate::hierarchy::RelationGraph;
use crate::models::{
    AggregationMethod, Condition, Indicator, IndicatorRelation, ListIndicatorsFilters, MonthlyValues,
    QuarterlyValues, RelationSummary, SaveIndicatorPayload, ValueKind, MONTHS_PER_YEAR, QUARTERS_PER_YEAR,
};
use crate::policy::normalize_text;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;

const BASE_COLUMNS: [&str; 11] = [
    "id",
    "code",
    "name",
    "owner",
    "unit",
    "indicator_type",
    "condition",
    "method",
    "year_to_date",
    "created_at",
    "updated_at",
];

/// Monthly results, monthly targets, quarterly results, quarterly targets.
static VALUE_COLUMNS: Lazy<Vec<String>> = Lazy::new(|| {
    let mut columns = Vec::with_capacity(2 * (MONTHS_PER_YEAR + QUARTERS_PER_YEAR));
    for suffix in ["result", "target"] {
        columns.extend(MONTH_KEYS.iter().map(|month| format!("{month}_{suffix}")));
    }
    for suffix in ["result", "target"] {
        columns.extend((1..=QUARTERS_PER_YEAR).map(|quarter| format!("q{quarter}_{suffix}")));
    }
    columns
});

/// Everything but `id`, in the order [`write_values`] produces.
static WRITE_COLUMNS: Lazy<Vec<String>> = Lazy::new(|| {
    BASE_COLUMNS[1..]
        .iter()
        .map(|column| column.to_string())
        .chain(VALUE_COLUMNS.iter().cloned())
        .collect()
});

static SELECT_INDICATOR: Lazy<String> =
    Lazy::new(|| format!("SELECT {} FROM indicators", select_list("")));

static SELECT_CHILD_INDICATORS: Lazy<String> = Lazy::new(|| {
    format!(
        "SELECT {} FROM indicator_relations r
         JOIN indicators i ON i.id = r.child_id
         WHERE r.parent_id = ?1
         ORDER BY r.id",
        select_list("i.")
    )
});

static INSERT_INDICATOR: Lazy<String> = Lazy::new(|| {
    let placeholders: Vec<String> = (1..=WRITE_COLUMNS.len()).map(|index| format!("?{index}")).collect();
    format!(
        "INSERT INTO indicators ({}) VALUES ({})",
        WRITE_COLUMNS.join(", "),
        placeholders.join(", ")
    )
});

static UPDATE_INDICATOR: Lazy<String> = Lazy::new(|| {
    let assignments: Vec<String> = WRITE_COLUMNS
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect();
    format!(
        "UPDATE indicators SET {} WHERE id = ?{}",
        assignments.join(", "),
        WRITE_COLUMNS.len() + 1
    )
});

const CHILD_SUMMARY_SQL: &str = "SELECT r.id, i.id, i.code, i.name
     FROM indicator_relations r JOIN indicators i ON i.id = r.child_id
     WHERE r.parent_id = ?1 ORDER BY r.id";

const PARENT_SUMMARY_SQL: &str = "SELECT r.id, i.id, i.code, i.name
     FROM indicator_relations r JOIN indicators i ON i.id = r.parent_id
     WHERE r.child_id = ?1 ORDER BY r.id";

fn select_list(prefix: &str) -> String {
    BASE_COLUMNS
        .iter()
        .map(|column| format!("{prefix}{column}"))
        .chain(VALUE_COLUMNS.iter().map(|column| format!("{prefix}{column}")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One `indicators` row without its relation and category lookups.
#[derive(Debug, Clone)]
struct IndicatorRow {
    id: i64,
    code: String,
    name: Option<String>,
    owner: Option<String>,
    unit: Option<String>,
    indicator_type: Option<String>,
    condition: Condition,
    method: AggregationMethod,
    monthly: MonthlyValues,
    quarterly: QuarterlyValues,
    year_to_date: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Database {
    /// Creates (no `id`) or updates (with `id`) an indicator. Fields the
    /// payload omits keep their stored values on update.
    ///
    /// A missing code on create is assigned from the numeric sequence. A
    /// constraint failure on that insert is retried with a fresh code up to
    /// `codeAssignmentRetries` times before it is surfaced.
    pub fn save_indicator(&self, payload: &SaveIndicatorPayload) -> AppResult<Indicator> {
        let retries = self.get_settings()?.code_assignment_retries;
        let auto_code = payload.id.is_none() && normalize_text(payload.code.clone()).is_none();

        let mut conn = self.lock()?;
        let mut attempt = 0u32;
        let id = loop {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            match save_indicator_in_tx(&tx, payload, Utc::now()) {
                Ok(id) => {
                    tx.commit()?;
                    break id;
                }
                // The IMMEDIATE lock already orders writers that go through
                // this crate; this arm only fires for rules enforced by the
                // schema itself, e.g. triggers installed by another tool.
                Err(error) if auto_code && error.is_constraint() => {
                    if attempt >= retries {
                        return Err(AppError::Constraint(format!(
                            "could not assign a unique indicator code after {} attempts",
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    tracing::warn!(attempt, error = %error, "generated indicator code collided, retrying");
                }
                Err(error) => return Err(error),
            }
        };

        let row = load_indicator_row(&conn, id)?
            .ok_or_else(|| AppError::Internal(format!("indicator {id} vanished after save")))?;
        hydrate(&conn, row)
    }

    pub fn get_indicator(&self, id: i64) -> AppResult<Option<Indicator>> {
        let conn = self.lock()?;
        match load_indicator_row(&conn, id)? {
            Some(row) => Ok(Some(hydrate(&conn, row)?)),
            None => Ok(None),
        }
    }

    pub fn list_indicators(&self, filters: &ListIndicatorsFilters) -> AppResult<Vec<Indicator>> {
        let conn = self.lock()?;
        let rows = match filters.category_id {
            Some(category_id) => {
                let sql = format!(
                    "{} WHERE id IN (SELECT indicator_id FROM indicator_categories WHERE category_id = ?1)
                     ORDER BY id",
                    SELECT_INDICATOR.as_str()
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![category_id], parse_indicator_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("{} ORDER BY id", SELECT_INDICATOR.as_str());
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], parse_indicator_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        rows.into_iter().map(|row| hydrate(&conn, row)).collect()
    }

    /// Deletes the indicator and its edges, then refreshes the former parents.
    pub fn delete_indicator(&self, id: i64) -> AppResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let former_parents = load_graph(&tx)?.parents(id).to_vec();
        let deleted = tx.execute("DELETE FROM indicators WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Ok(false);
        }
        refresh_indicators(&tx, &former_parents, Utc::now())?;
        tx.commit()?;
        Ok(true)
    }

    pub fn create_relation(&self, parent_id: i64, child_id: i64) -> AppResult<IndicatorRelation> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for id in [parent_id, child_id] {
            if !row_exists(&tx, "indicators", id)? {
                return Err(AppError::Validation(format!("indicator {id} not found")));
            }
        }
        let graph = load_graph(&tx)?;
        if graph.children(parent_id).contains(&child_id) {
            return Err(AppError::Validation(format!(
                "duplicate relation {parent_id} -> {child_id}"
            )));
        }
        if graph.would_create_cycle(parent_id, child_id) {
            return Err(AppError::Validation(format!(
                "relation {parent_id} -> {child_id} would create a cycle"
            )));
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO indicator_relations (parent_id, child_id, created_at) VALUES (?1, ?2, ?3)",
            params![parent_id, child_id, now.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        refresh_indicators(&tx, &[parent_id], now)?;
        tx.commit()?;

        Ok(IndicatorRelation {
            id,
            parent_id,
            child_id,
            created_at: now,
        })
    }

    pub fn get_relation(&self, id: i64) -> AppResult<Option<IndicatorRelation>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, parent_id, child_id, created_at FROM indicator_relations WHERE id = ?1",
                params![id],
                parse_relation_row,
            )
            .optional()?)
    }

    pub fn list_relations(&self) -> AppResult<Vec<IndicatorRelation>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, parent_id, child_id, created_at FROM indicator_relations ORDER BY id")?;
        let rows = stmt.query_map([], parse_relation_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Removes one edge; the former parent and its ancestors are refreshed.
    pub fn delete_relation(&self, id: i64) -> AppResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let parent_id: Option<i64> = tx
            .query_row(
                "SELECT parent_id FROM indicator_relations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(parent_id) = parent_id else {
            return Ok(false);
        };
        tx.execute("DELETE FROM indicator_relations WHERE id = ?1", params![id])?;
        refresh_indicators(&tx, &[parent_id], Utc::now())?;
        tx.commit()?;
        Ok(true)
    }
}

/// The whole save: validate references, derive, write once, link
/// categories, then walk the ancestors bottom-up.
fn save_indicator_in_tx(conn: &Connection, payload: &SaveIndicatorPayload, now: DateTime<Utc>) -> AppResult<i64> {
    let existing = match payload.id {
        Some(id) => Some(
            load_indicator_row(conn, id)?.ok_or_else(|| AppError::NotFound(format!("indicator {id} not found")))?,
        ),
        None => None,
    };

    let code = match normalize_text(payload.code.clone()) {
        Some(code) => {
            let owner: Option<i64> = conn
                .query_row("SELECT id FROM indicators WHERE code = ?1", params![code], |row| row.get(0))
                .optional()?;
            if owner.is_some_and(|owner| Some(owner) != payload.id) {
                return Err(AppError::Validation(format!("indicator code '{code}' is already in use")));
            }
            code
        }
        None => match &existing {
            Some(row) => row.code.clone(),
            None => next_sequential_code(conn)?,
        },
    };

    if let Some(category_ids) = &payload.category_ids {
        for &category_id in category_ids {
            if !row_exists(conn, "categories", category_id)? {
                return Err(AppError::Validation(format!("category {category_id} does not exist")));
            }
        }
    }

    let condition = payload
        .condition
        .or(existing.as_ref().map(|row| row.condition))
        .unwrap_or_default();
    let method = payload
        .method
        .or(existing.as_ref().map(|row| row.method))
        .unwrap_or_default();
    let monthly = payload
        .monthly
        .or(existing.as_ref().map(|row| row.monthly))
        .unwrap_or_default();
    let recalc = needs_quarter_recalc(
        existing.as_ref().map(|row| (&row.monthly, row.method)),
        &monthly,
        method,
    );
    let children = match &existing {
        Some(row) => child_months(conn, row.id)?,
        None => Vec::new(),
    };
    let stored_quarterly = existing.as_ref().map(|row| row.quarterly).unwrap_or_default();
    let derived = derive(method, monthly, stored_quarterly, &children, recalc);

    let row = IndicatorRow {
        id: existing.as_ref().map(|row| row.id).unwrap_or_default(),
        code,
        name: merged_text(&payload.name, existing.as_ref().and_then(|row| row.name.clone())),
        owner: merged_text(&payload.owner, existing.as_ref().and_then(|row| row.owner.clone())),
        unit: merged_text(&payload.unit, existing.as_ref().and_then(|row| row.unit.clone())),
        indicator_type: merged_text(
            &payload.indicator_type,
            existing.as_ref().and_then(|row| row.indicator_type.clone()),
        ),
        condition,
        method,
        monthly: derived.monthly,
        quarterly: derived.quarterly,
        year_to_date: derived.year_to_date,
        created_at: existing.as_ref().map(|row| row.created_at).unwrap_or(now),
        updated_at: now,
    };
    let id = write_indicator(conn, &row, existing.is_none())?;

    if let Some(category_ids) = &payload.category_ids {
        let unique: BTreeSet<i64> = category_ids.iter().copied().collect();
        conn.execute("DELETE FROM indicator_categories WHERE indicator_id = ?1", params![id])?;
        for category_id in unique {
            conn.execute(
                "INSERT INTO indicator_categories (indicator_id, category_id) VALUES (?1, ?2)",
                params![id, category_id],
            )?;
        }
    }

    let graph = load_graph(conn)?;
    for ancestor in graph.propagation_order(id)? {
        refresh_one(conn, ancestor, now)?;
    }

    Ok(id)
}

/// Omitted keeps `stored`; a blank value clears it.
fn merged_text(update: &Option<String>, stored: Option<String>) -> Option<String> {
    match update {
        Some(_) => normalize_text(update.clone()),
        None => stored,
    }
}

/// Refreshes `dirty` and all of their ancestors from their children.
fn refresh_indicators(conn: &Connection, dirty: &[i64], now: DateTime<Utc>) -> AppResult<()> {
    if dirty.is_empty() {
        return Ok(());
    }
    let graph = load_graph(conn)?;
    for id in graph.refresh_order(dirty)? {
        refresh_one(conn, id, now)?;
    }
    Ok(())
}

fn refresh_one(conn: &Connection, id: i64, now: DateTime<Utc>) -> AppResult<()> {
    let Some(row) = load_indicator_row(conn, id)? else {
        return Ok(());
    };
    let children = child_months(conn, id)?;
    let derived = derive(row.method, row.monthly, row.quarterly, &children, true);
    let refreshed = IndicatorRow {
        monthly: derived.monthly,
        quarterly: derived.quarterly,
        year_to_date: derived.year_to_date,
        updated_at: now,
        ..row
    };
    write_indicator(conn, &refreshed, false)?;
    tracing::debug!(indicator_id = id, "refreshed indicator from children");
    Ok(())
}

fn write_indicator(conn: &Connection, row: &IndicatorRow, is_new: bool) -> AppResult<i64> {
    let mut values = write_values(row);
    if is_new {
        conn.execute(INSERT_INDICATOR.as_str(), params_from_iter(values))?;
        Ok(conn.last_insert_rowid())
    } else {
        values.push(Value::Integer(row.id));
        conn.execute(UPDATE_INDICATOR.as_str(), params_from_iter(values))?;
        Ok(row.id)
    }
}

fn write_values(row: &IndicatorRow) -> Vec<Value> {
    let mut values = vec![
        Value::Text(row.code.clone()),
        text_value(&row.name),
        text_value(&row.owner),
        text_value(&row.unit),
        text_value(&row.indicator_type),
        Value::Text(row.condition.as_str().to_string()),
        Value::Text(row.method.as_str().to_string()),
        real_value(row.year_to_date),
        Value::Text(row.created_at.to_rfc3339()),
        Value::Text(row.updated_at.to_rfc3339()),
    ];
    for kind in ValueKind::ALL {
        values.extend(row.monthly.series(kind).iter().map(|value| real_value(*value)));
    }
    for kind in ValueKind::ALL {
        values.extend(row.quarterly.series(kind).iter().map(|value| real_value(*value)));
    }
    values
}

fn text_value(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn real_value(value: Option<f64>) -> Value {
    value.map(Value::Real).unwrap_or(Value::Null)
}

/// Highest all-digit code plus one. Codes with any other character are
/// ignored when picking the next number.
fn next_sequential_code(conn: &Connection) -> AppResult<String> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(CAST(code AS INTEGER)), 0) FROM indicators
         WHERE code <> '' AND code NOT GLOB '*[^0-9]*'",
        [],
        |row| row.get(0),
    )?;
    Ok((max + 1).to_string())
}

fn load_indicator_row(conn: &Connection, id: i64) -> AppResult<Option<IndicatorRow>> {
    let sql = format!("{} WHERE id = ?1", SELECT_INDICATOR.as_str());
    Ok(conn.query_row(&sql, params![id], parse_indicator_row).optional()?)
}

fn child_months(conn: &Connection, parent_id: i64) -> AppResult<Vec<MonthlyValues>> {
    let mut stmt = conn.prepare(SELECT_CHILD_INDICATORS.as_str())?;
    let rows = stmt.query_map(params![parent_id], parse_indicator_row)?;
    let mut months = Vec::new();
    for row in rows {
        months.push(row?.monthly);
    }
    Ok(months)
}

fn load_graph(conn: &Connection) -> AppResult<RelationGraph> {
    let mut stmt = conn.prepare("SELECT parent_id, child_id FROM indicator_relations")?;
    let edges = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RelationGraph::from_edges(edges))
}

fn hydrate(conn: &Connection, row: IndicatorRow) -> AppResult<Indicator> {
    let mut stmt = conn.prepare(
        "SELECT category_id FROM indicator_categories WHERE indicator_id = ?1 ORDER BY category_id",
    )?;
    let category_ids = stmt
        .query_map(params![row.id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Indicator {
        id: row.id,
        children: relation_summaries(conn, CHILD_SUMMARY_SQL, row.id)?,
        parents: relation_summaries(conn, PARENT_SUMMARY_SQL, row.id)?,
        code: row.code,
        name: row.name,
        owner: row.owner,
        unit: row.unit,
        indicator_type: row.indicator_type,
        condition: row.condition,
        method: row.method,
        monthly: row.monthly,
        quarterly: row.quarterly,
        year_to_date: row.year_to_date,
        category_ids,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn relation_summaries(conn: &Connection, sql: &str, id: i64) -> AppResult<Vec<RelationSummary>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(RelationSummary {
            relation_id: row.get(0)?,
            indicator_id: row.get(1)?,
            code: row.get(2)?,
            name: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn parse_indicator_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndicatorRow> {
    let mut monthly = MonthlyValues::default();
    let mut quarterly = QuarterlyValues::default();
    let mut index = BASE_COLUMNS.len();
    for kind in ValueKind::ALL {
        for slot in monthly.series_mut(kind).iter_mut() {
            *slot = row.get(index)?;
            index += 1;
        }
    }
    for kind in ValueKind::ALL {
        for slot in quarterly.series_mut(kind).iter_mut() {
            *slot = row.get(index)?;
            index += 1;
        }
    }

    let condition: String = row.get(6)?;
    let method: String = row.get(7)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(IndicatorRow {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        owner: row.get(3)?,
        unit: row.get(4)?,
        indicator_type: row.get(5)?,
        condition: parse_condition(&condition)?,
        method: parse_method(&method)?,
        monthly,
        quarterly,
        year_to_date: row.get(8)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn parse_relation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndicatorRelation> {
    let created_at: String = row.get(3)?;
    Ok(IndicatorRelation {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        child_id: row.get(2)?,
        created_at: parse_time(&created_at)?,
    })
}

fn parse_condition(raw: &str) -> rusqlite::Result<Condition> {
    match raw {
        "greater-is-better" => Ok(Condition::GreaterIsBetter),
        "less-is-better" => Ok(Condition::LessIsBetter),
        other => Err(invalid_text(6, format!("Unknown condition '{}'", other))),
    }
}

fn parse_method(raw: &str) -> rusqlite::Result<AggregationMethod> {
    match raw {
        "average" => Ok(AggregationMethod::Average),
        "sum" => Ok(AggregationMethod::Sum),
        other => Err(invalid_text(7, format!("Unknown aggregation method '{}'", other))),
    }
}
