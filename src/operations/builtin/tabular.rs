use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{blocking, write_artifact};

/// Keeps the CSV rows whose `column` equals `value` and writes them as a
/// JSON array of records.
pub struct FilterCsvOperation;

/// Integers and finite floats become JSON numbers; everything else stays
/// a string.
fn infer(cell: &str) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

fn filter_csv(path: &Path, column: &str, value: &str) -> anyhow::Result<Vec<Value>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let index = headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| invalid_input(format!("CSV has no column named '{column}'")))?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.get(index).map(str::trim) != Some(value) {
            continue;
        }
        let record: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(h, cell)| (h.trim().to_string(), infer(cell.trim())))
            .collect();
        records.push(Value::Object(record));
    }
    Ok(records)
}

#[async_trait]
impl Operation for FilterCsvOperation {
    fn description(&self) -> &str {
        "Filter CSV rows on a column value and save them as JSON"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?.to_path_buf();
        let output = params.path("output")?;
        let column = params.value("column").unwrap_or("category").to_string();
        let value = params.value("value").unwrap_or("Technology").to_string();

        let records = blocking(move || filter_csv(&input, &column, &value)).await?;
        write_artifact(context, output, serde_json::to_string_pretty(&records)?).await?;

        Ok(Output::from(format!("Kept {} matching rows", records.len())))
    }
}
