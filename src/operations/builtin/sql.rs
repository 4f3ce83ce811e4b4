//! SQLite-backed operations. Databases are always opened read-only.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{blocking, write_artifact};

fn open_read_only(path: &Path) -> anyhow::Result<Connection> {
    if !path.is_file() {
        anyhow::bail!("Database not found: {}", path.display());
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Ok(Connection::open_with_flags(path, flags)?)
}

fn render_real(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn render_text(text: &str) -> String {
    if text.contains('\'') && !text.contains('"') {
        format!("\"{}\"", text.replace('\\', "\\\\"))
    } else {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

/// Renders one SQLite value the way a Python result tuple prints it.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => render_real(*r),
        Value::Text(t) => render_text(t),
        Value::Blob(b) => format!("b'{}'", b.escape_ascii()),
    }
}

fn render_rows(rows: &[Vec<Value>]) -> String {
    let rendered: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(render_value).collect();
            if cells.len() == 1 {
                format!("({},)", cells[0])
            } else {
                format!("({})", cells.join(", "))
            }
        })
        .collect();
    format!("[{}]", rendered.join(", "))
}

fn run_query(db: &Path, query: &str) -> anyhow::Result<Vec<Vec<Value>>> {
    let conn = open_read_only(db)?;
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| invalid_input(format!("Invalid query: {e}")))?;
    if !stmt.readonly() {
        return Err(invalid_input("Only read-only queries are allowed"));
    }

    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(row.get::<_, Value>(i)?);
        }
        out.push(values);
    }
    Ok(out)
}

// ── run_sql ────────────────────────────────────────────

/// Runs a read-only SQL query and saves the result rows.
pub struct RunSqlOperation;

#[async_trait]
impl Operation for RunSqlOperation {
    fn description(&self) -> &str {
        "Run a read-only SQL query against a SQLite database and save the rows"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let db = params.path("db")?.to_path_buf();
        let output = params.path("output")?;
        let query = params
            .value("query")
            .ok_or_else(|| invalid_input("No SQL query found in the task"))?
            .to_string();

        let rows = blocking(move || run_query(&db, &query)).await?;
        write_artifact(context, output, render_rows(&rows)).await?;

        Ok(Output::from(format!("Query returned {} rows", rows.len())))
    }
}

// ── ticket_sales ───────────────────────────────────────

const TICKET_SALES_QUERY: &str = "SELECT COALESCE(SUM(units * price), 0) FROM tickets \
     WHERE lower(trim(type)) = lower(trim(?1))";

fn ticket_sales(db: &Path, ticket_type: &str) -> anyhow::Result<Value> {
    let conn = open_read_only(db)?;
    Ok(conn.query_row(TICKET_SALES_QUERY, [ticket_type], |row| row.get::<_, Value>(0))?)
}

/// Totals `units * price` over the `tickets` table for one ticket type.
pub struct TicketSalesOperation;

#[async_trait]
impl Operation for TicketSalesOperation {
    fn description(&self) -> &str {
        "Total the sales of one ticket type in a SQLite database"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let db = params.path("db")?.to_path_buf();
        let output = params.path("output")?;
        let ticket_type = params.value("ticket_type").unwrap_or("gold").to_string();

        let label = ticket_type.clone();
        let total = blocking(move || ticket_sales(&db, &ticket_type)).await?;
        let total = render_value(&total);

        write_artifact(context, output, &total).await?;
        Ok(Output::from(format!("Total {label} ticket sales: {total}")))
    }
}
