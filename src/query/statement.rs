//! Statements issued by a session
//!
//! Everything is built with `sea_query` for PostgreSQL so values always travel
//! as bound parameters.

use super::options::FindManyOptions;
use super::sql::SqlStatement;
use sea_query::{
    Asterisk, Condition, ConditionalStatement, DynIden, Expr, ExprTrait, Func,
    PostgresQueryBuilder, Query, Value,
};

/// Owned identifier for a table or column name
pub fn iden(name: &str) -> DynIden {
    DynIden::from(name.to_string())
}

/// Alias of the count column
pub const COUNT_ALIAS: &str = "amount";

/// `SELECT * FROM table WHERE column IN (...)`
pub fn select_where_in(table: &str, column: &str, values: Vec<Value>) -> SqlStatement {
    let mut query = Query::select();
    query
        .column(Asterisk)
        .from(iden(table))
        .and_where(Expr::col(iden(column)).is_in(values));
    query.build(PostgresQueryBuilder).into()
}

/// `SELECT *` with optional filter, order, offset and limit
pub fn select_many(table: &str, options: &FindManyOptions) -> SqlStatement {
    let mut query = Query::select();
    query.column(Asterisk).from(iden(table));
    if let Some(filter) = &options.filter {
        query.cond_where(filter.clone());
    }
    for (column, order) in &options.order_by {
        query.order_by(iden(column), order.clone());
    }
    if let Some(limit) = options.limit {
        query.limit(limit);
    }
    if let Some(offset) = options.offset {
        query.offset(offset);
    }
    query.build(PostgresQueryBuilder).into()
}

/// `SELECT COUNT("id") AS "amount"` with an optional filter
pub fn count(table: &str, filter: Option<&Condition>) -> SqlStatement {
    let mut query = Query::select();
    query
        .expr_as(Func::count(Expr::col(iden("id"))), iden(COUNT_ALIAS))
        .from(iden(table));
    if let Some(filter) = filter {
        query.cond_where(filter.clone());
    }
    query.build(PostgresQueryBuilder).into()
}

/// Multi-row `INSERT ... RETURNING *`
///
/// Every row must have one value per column.
pub fn insert_rows(
    table: &str,
    columns: &[String],
    rows: Vec<Vec<Value>>,
) -> Result<SqlStatement, sea_query::error::Error> {
    let mut query = Query::insert();
    query
        .into_table(iden(table))
        .columns(columns.iter().map(|c| iden(c)));
    for row in rows {
        query.values(row.into_iter().map(Expr::val))?;
    }
    query.returning_all();
    Ok(query.build(PostgresQueryBuilder).into())
}

/// Single-row insert with every column at its default
pub fn insert_default(table: &str) -> SqlStatement {
    SqlStatement::new(format!(
        "INSERT INTO \"{table}\" DEFAULT VALUES RETURNING *"
    ))
}

/// `UPDATE ... SET ... WHERE "id" = $n RETURNING *`
///
/// With nothing to set, the row is selected instead so the caller still
/// gets it back.
pub fn update_row(table: &str, id: Value, sets: Vec<(String, Value)>) -> SqlStatement {
    if sets.is_empty() {
        return select_where_in(table, "id", vec![id]);
    }
    let mut query = Query::update();
    query.table(iden(table));
    for (column, value) in sets {
        query.value(iden(&column), Expr::val(value));
    }
    query
        .and_where(Expr::col(iden("id")).eq(id))
        .returning_all();
    query.build(PostgresQueryBuilder).into()
}

/// `DELETE ... WHERE ... RETURNING *`
pub fn delete_where(table: &str, filter: Condition) -> SqlStatement {
    let mut query = Query::delete();
    query
        .from_table(iden(table))
        .cond_where(filter)
        .returning_all();
    query.build(PostgresQueryBuilder).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_query::Order;

    #[test]
    fn test_select_where_in_binds_ids() {
        let stmt = select_where_in("call", "ship_id", vec![Value::from(1i64), Value::from(2i64)]);
        assert!(stmt.sql.starts_with("SELECT * FROM \"call\" WHERE"));
        assert!(stmt.sql.contains("\"ship_id\" IN ($1, $2)"));
        assert_eq!(stmt.values.0.len(), 2);
    }

    #[test]
    fn test_select_many_orders_and_paginates() {
        let options = FindManyOptions::new()
            .filter(Condition::all().add(Expr::col(iden("name")).eq("Aurora")))
            .order_by("name", Order::Desc)
            .limit(10)
            .offset(20);
        let stmt = select_many("ship", &options);
        assert!(stmt.sql.contains("ORDER BY \"name\" DESC"));
        assert!(stmt.sql.contains("LIMIT"));
        assert!(stmt.sql.contains("OFFSET"));
        assert_eq!(stmt.values.0[0], Value::from("Aurora"));
    }

    #[test]
    fn test_count_uses_alias() {
        let stmt = count("ship", None);
        assert!(stmt.sql.contains("COUNT(\"id\") AS \"amount\""));
        assert!(stmt.values.0.is_empty());
    }

    #[test]
    fn test_insert_rows_returning() {
        let stmt = insert_rows(
            "ship",
            &["name".to_string(), "port_id".to_string()],
            vec![
                vec![Value::from("a"), Value::from(1i64)],
                vec![Value::from("b"), Value::BigInt(None)],
            ],
        )
        .expect("insert");
        assert!(stmt.sql.starts_with("INSERT INTO \"ship\" (\"name\", \"port_id\") VALUES"));
        assert!(stmt.sql.ends_with("RETURNING *"));
        assert_eq!(stmt.values.0.len(), 4);
    }

    #[test]
    fn test_insert_rows_rejects_ragged_rows() {
        let result = insert_rows("ship", &["name".to_string()], vec![vec![]]);
        assert!(result.is_err());
    }

    #[test]
    fn test_update_without_sets_selects() {
        let stmt = update_row("ship", Value::from(3i64), Vec::new());
        assert!(stmt.sql.starts_with("SELECT"));
        let stmt = update_row("ship", Value::from(3i64), vec![("name".to_string(), Value::from("x"))]);
        assert!(stmt.sql.starts_with("UPDATE \"ship\" SET \"name\" = $1"));
        assert!(stmt.sql.ends_with("RETURNING *"));
    }

    #[test]
    fn test_delete_returning() {
        let stmt = delete_where("ship", Condition::all().add(Expr::col(iden("id")).is_in([Value::from(1i64)])));
        assert!(stmt.sql.starts_with("DELETE FROM \"ship\" WHERE"));
        assert!(stmt.sql.ends_with("RETURNING *"));
    }

    #[test]
    fn test_insert_default() {
        assert_eq!(
            insert_default("port").sql,
            "INSERT INTO \"port\" DEFAULT VALUES RETURNING *"
        );
    }
}
