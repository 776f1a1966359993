//! Shared fixtures for the behavioural tests
//!
//! [`FixtureStore`] keeps a few in-memory tables and answers the statements a
//! session generates, which lets the tests run against [`MockDriver`] while
//! still counting real round trips.
//!
//! Shipping schema used throughout:
//! - Port
//! - Ship many_to_one homePort (nullable), one_to_many calls, one_to_one_inverse captain
//! - Captain one_to_one_owned ship
//! - Call many_to_one ship, one_to_many loadOrders / unloadOrders
//! - LoadOrder / UnloadOrder many_to_one call
//! - Tag, with nothing but an id

#![allow(dead_code)]

use berth::mock::MockDriver;
use berth::schema::{EntityDef, FieldDef, FieldType, RelationDecl, Schema};
use berth::{DriverError, Orm, RawRow};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Schema
// ============================================================================

pub fn shipping_schema() -> Arc<Schema> {
    Schema::builder()
        .entity(
            EntityDef::new("Port")
                .field("id", FieldDef::id())
                .field("name", FieldDef::new(FieldType::Text, false)),
        )
        .entity(
            EntityDef::new("Ship")
                .field("id", FieldDef::id())
                .field("name", FieldDef::new(FieldType::Text, false))
                .field("callSign", FieldDef::new(FieldType::Text, true))
                .many_to_one("homePort", RelationDecl::to("Port").nullable(true))
                .one_to_many("calls", RelationDecl::to("Call").inverse("ship"))
                .one_to_one_inverse("captain", RelationDecl::to("Captain").inverse("ship")),
        )
        .entity(
            EntityDef::new("Captain")
                .field("id", FieldDef::id())
                .field("name", FieldDef::new(FieldType::Text, false))
                .one_to_one_owned("ship", RelationDecl::to("Ship").nullable(true)),
        )
        .entity(
            EntityDef::new("Call")
                .field("id", FieldDef::id())
                .many_to_one("ship", RelationDecl::to("Ship"))
                .one_to_many("loadOrders", RelationDecl::to("LoadOrder").inverse("call"))
                .one_to_many("unloadOrders", RelationDecl::to("UnloadOrder").inverse("call")),
        )
        .entity(
            EntityDef::new("LoadOrder")
                .field("id", FieldDef::id())
                .field("cargo", FieldDef::new(FieldType::Text, false))
                .many_to_one("call", RelationDecl::to("Call")),
        )
        .entity(
            EntityDef::new("UnloadOrder")
                .field("id", FieldDef::id())
                .field("cargo", FieldDef::new(FieldType::Text, false))
                .many_to_one("call", RelationDecl::to("Call")),
        )
        .entity(EntityDef::new("Tag").field("id", FieldDef::id()))
        .build()
        .expect("shipping schema is valid")
}

/// Store seeded with two ships, three calls and their orders
pub fn seeded_store() -> Arc<FixtureStore> {
    let store = FixtureStore::new();
    store.table("port", &["name"]);
    store.table("ship", &["name", "call_sign", "home_port_id"]);
    store.table("captain", &["name", "ship_id"]);
    store.table("call", &["ship_id"]);
    store.table("load_order", &["cargo", "call_id"]);
    store.table("unload_order", &["cargo", "call_id"]);
    store.table("tag", &[]);

    store.seed("port", json!({"id": 1, "name": "Rotterdam"}));
    store.seed("port", json!({"id": 2, "name": "Antwerp"}));
    store.seed("ship", json!({"id": 1, "name": "Aurora", "call_sign": "PDAU", "home_port_id": 1}));
    store.seed("ship", json!({"id": 2, "name": "Borealis", "call_sign": null, "home_port_id": null}));
    store.seed("captain", json!({"id": 1, "name": "Jansen", "ship_id": 1}));
    store.seed("call", json!({"id": 10, "ship_id": 1}));
    store.seed("call", json!({"id": 11, "ship_id": 1}));
    store.seed("call", json!({"id": 12, "ship_id": 2}));
    store.seed("load_order", json!({"id": 100, "cargo": "steel", "call_id": 10}));
    store.seed("load_order", json!({"id": 101, "cargo": "grain", "call_id": 10}));
    store.seed("load_order", json!({"id": 102, "cargo": "coal", "call_id": 11}));
    store.seed("unload_order", json!({"id": 200, "cargo": "cars", "call_id": 11}));
    store
}

pub fn orm_for(store: &Arc<FixtureStore>) -> (Orm, MockDriver) {
    let driver = store.driver();
    let orm = Orm::new(Arc::new(driver.clone()), shipping_schema());
    (orm, driver)
}

// ============================================================================
// Fixture store
// ============================================================================

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

#[derive(Debug)]
pub struct FixtureStore {
    tables: Mutex<BTreeMap<String, Table>>,
    next_id: AtomicI64,
    failing: Mutex<Option<String>>,
}

impl FixtureStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1000),
            failing: Mutex::new(None),
        })
    }

    /// Declare a table and its non-id columns
    pub fn table(&self, name: &str, columns: &[&str]) {
        let mut tables = self.tables.lock().expect("tables");
        tables.entry(name.to_string()).or_default().columns =
            columns.iter().map(|c| c.to_string()).collect();
    }

    pub fn seed(&self, table: &str, row: Json) {
        let row = row.as_object().cloned().expect("seed rows are objects");
        let mut tables = self.tables.lock().expect("tables");
        tables.entry(table.to_string()).or_default().rows.push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<RawRow> {
        let tables = self.tables.lock().expect("tables");
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Fail every statement containing `pattern`
    pub fn fail_when(&self, pattern: &str) {
        *self.failing.lock().expect("failing") = Some(pattern.to_string());
    }

    pub fn driver(self: &Arc<Self>) -> MockDriver {
        let store = Arc::clone(self);
        MockDriver::new(move |sql, params| store.answer(sql, params))
    }

    fn answer(&self, sql: &str, params: &[Json]) -> Result<Vec<RawRow>, DriverError> {
        if let Some(pattern) = self.failing.lock().expect("failing").as_deref() {
            if sql.contains(pattern) {
                return Err(DriverError::QueryError(format!("fixture failure on {pattern}")));
            }
        }

        if let Some(rest) = sql.strip_prefix("SELECT COUNT(\"id\") AS \"amount\" FROM ") {
            let (table, rest) = take_ident(rest);
            let clause = rest.trim().strip_prefix("WHERE ").unwrap_or("");
            let amount = self
                .rows(&table)
                .iter()
                .filter(|row| matches(row, clause, params))
                .count();
            let mut row = RawRow::new();
            row.insert("amount".to_string(), json!(amount));
            return Ok(vec![row]);
        }
        if let Some(rest) = sql.strip_prefix("SELECT * FROM ") {
            return Ok(self.select(rest, params));
        }
        if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            return Ok(self.insert(rest, params));
        }
        if let Some(rest) = sql.strip_prefix("UPDATE ") {
            return Ok(self.update(rest, params));
        }
        if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            return Ok(self.delete(rest, params));
        }
        Err(DriverError::QueryError(format!("fixture cannot answer: {sql}")))
    }

    fn select(&self, rest: &str, params: &[Json]) -> Vec<RawRow> {
        let (table, rest) = take_ident(rest);
        let (rest, offset) = split_clause(rest, "OFFSET ");
        let (rest, limit) = split_clause(rest, "LIMIT ");
        let (rest, order) = split_clause(rest, "ORDER BY ");
        let clause = rest.trim().strip_prefix("WHERE ").unwrap_or("");

        let mut rows: Vec<RawRow> = self
            .rows(&table)
            .into_iter()
            .filter(|row| matches(row, clause, params))
            .collect();
        if let Some(order) = order {
            for term in order.split(", ").collect::<Vec<_>>().into_iter().rev() {
                let (column, direction) = take_ident(term.trim());
                let descending = direction.trim() == "DESC";
                rows.sort_by(|a, b| {
                    let ordering = compare(a.get(&column), b.get(&column));
                    if descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
            }
        }
        let offset = offset.map_or(0, |o| param_usize(o, params));
        let limit = limit.map_or(usize::MAX, |l| param_usize(l, params));
        rows.into_iter().skip(offset).take(limit).collect()
    }

    fn insert(&self, rest: &str, params: &[Json]) -> Vec<RawRow> {
        let (table, rest) = take_ident(rest);
        let rest = rest.trim();
        let mut tables = self.tables.lock().expect("tables");
        let entry = tables.entry(table).or_default();

        let (columns, values): (Vec<String>, Vec<Json>) = if rest.starts_with("DEFAULT VALUES") {
            (Vec::new(), Vec::new())
        } else {
            let close = rest.find(')').expect("column list");
            let columns = rest[1..close]
                .split(", ")
                .map(|c| take_ident(c.trim()).0)
                .collect();
            let values = placeholders(&rest[close..])
                .into_iter()
                .map(|n| params[n - 1].clone())
                .collect();
            (columns, values)
        };

        let row_count = if columns.is_empty() { 1 } else { values.len() / columns.len() };
        let mut inserted = Vec::new();
        for index in 0..row_count {
            let mut row = RawRow::new();
            row.insert("id".to_string(), json!(self.next_id.fetch_add(1, Ordering::SeqCst)));
            for column in &entry.columns {
                row.insert(column.clone(), Json::Null);
            }
            for (offset, column) in columns.iter().enumerate() {
                row.insert(column.clone(), values[index * columns.len() + offset].clone());
            }
            entry.rows.push(row.clone());
            inserted.push(row);
        }
        inserted
    }

    fn update(&self, rest: &str, params: &[Json]) -> Vec<RawRow> {
        let (table, rest) = take_ident(rest);
        let rest = rest.trim().strip_prefix("SET ").expect("SET");
        let rest = rest.strip_suffix(" RETURNING *").unwrap_or(rest);
        let (sets, clause) = rest.split_once(" WHERE ").expect("WHERE");
        let assignments: Vec<(String, Json)> = sets
            .split(", ")
            .map(|set| {
                let (column, value) = take_ident(set.trim());
                let n = placeholders(value)[0];
                (column, params[n - 1].clone())
            })
            .collect();

        let mut tables = self.tables.lock().expect("tables");
        let mut updated = Vec::new();
        if let Some(entry) = tables.get_mut(&table) {
            for row in entry.rows.iter_mut().filter(|row| matches(row, clause, params)) {
                for (column, value) in &assignments {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        updated
    }

    fn delete(&self, rest: &str, params: &[Json]) -> Vec<RawRow> {
        let (table, rest) = take_ident(rest);
        let rest = rest.trim();
        let rest = rest.strip_suffix("RETURNING *").unwrap_or(rest).trim();
        let clause = rest.strip_prefix("WHERE ").unwrap_or("");

        let mut tables = self.tables.lock().expect("tables");
        let mut deleted = Vec::new();
        if let Some(entry) = tables.get_mut(&table) {
            entry.rows.retain(|row| {
                if matches(row, clause, params) {
                    deleted.push(row.clone());
                    false
                } else {
                    true
                }
            });
        }
        deleted
    }
}

// ============================================================================
// SQL helpers
// ============================================================================

/// Split a leading `"ident"` from the rest
fn take_ident(input: &str) -> (String, &str) {
    let input = input.trim_start();
    let body = input.strip_prefix('"').expect("quoted identifier");
    let end = body.find('"').expect("closing quote");
    (body[..end].to_string(), &body[end + 1..])
}

fn split_clause<'a>(input: &'a str, keyword: &str) -> (&'a str, Option<&'a str>) {
    match input.find(keyword) {
        Some(index) => (&input[..index], Some(input[index + keyword.len()..].trim())),
        None => (input, None),
    }
}

/// `$n` placeholder numbers in order of appearance
fn placeholders(input: &str) -> Vec<usize> {
    input
        .split('$')
        .skip(1)
        .filter_map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .collect()
}

fn param_usize(token: &str, params: &[Json]) -> usize {
    let n = placeholders(token)[0];
    params[n - 1].as_u64().expect("numeric limit/offset") as usize
}

fn key(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn compare(a: Option<&Json>, b: Option<&Json>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(Json::Number(x)), Some(Json::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (x, y) => x.and_then(key).cmp(&y.and_then(key)),
    }
}

/// Evaluate `"col" = $n` and `"col" IN ($a, $b)` terms joined by AND
fn matches(row: &RawRow, clause: &str, params: &[Json]) -> bool {
    let clause = clause.trim();
    if clause.is_empty() {
        return true;
    }
    clause.split(" AND ").all(|term| {
        let term = term.trim().trim_start_matches('(').trim_end_matches(')');
        let (column, rest) = take_ident(term);
        let actual = row.get(&column).and_then(key);
        let wanted: Vec<Option<String>> = placeholders(rest)
            .into_iter()
            .map(|n| key(&params[n - 1]))
            .collect();
        actual.is_some() && wanted.contains(&actual)
    })
}
