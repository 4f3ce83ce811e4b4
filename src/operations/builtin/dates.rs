//! Builtin operation: count the dates in a file falling on a given weekday.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use tracing::debug;

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{read_text, write_artifact};

/// Date layouts accepted, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%b %d, %Y", "%Y/%m/%d", "%d/%m/%Y"];

/// Date-time layouts accepted (the time part is ignored).
const DATETIME_FORMATS: &[&str] = &["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

pub struct CountWeekdaysOperation;

fn parse_weekday(name: &str) -> Option<Weekday> {
    name.trim().trim_end_matches('s').parse::<Weekday>().ok()
}

fn parse_date(line: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(line, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(line, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Counts non-blank lines whose date falls on `weekday`.
/// Fails on the first line that is not a recognizable date.
fn count_weekday(content: &str, weekday: Weekday) -> anyhow::Result<usize> {
    let mut count = 0;
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let date = parse_date(line)
            .ok_or_else(|| invalid_input(format!("Line {}: unrecognized date '{line}'", number + 1)))?;
        if date.weekday() == weekday {
            count += 1;
        }
    }
    Ok(count)
}

#[async_trait]
impl Operation for CountWeekdaysOperation {
    fn description(&self) -> &str {
        "Count how many dates in a file fall on a given weekday and write the number"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let output = params.path("output")?;
        let name = params.value("weekday").unwrap_or("wednesday");
        let weekday =
            parse_weekday(name).ok_or_else(|| invalid_input(format!("Unknown weekday: {name}")))?;

        let content = read_text(input).await?;
        let count = count_weekday(&content, weekday)?;
        debug!("{count} {name}s in {}", input.display());

        write_artifact(context, output, count.to_string()).await?;
        Ok(Output::from(format!("Counted {count} {name}s.")))
    }
}
