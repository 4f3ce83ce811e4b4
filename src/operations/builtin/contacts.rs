use async_trait::async_trait;
use serde_json::Value;

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{read_text, write_artifact};

/// Sorts a JSON array of contacts by `last_name`, then `first_name`.
pub struct SortContactsOperation;

fn name_key(contact: &Value, field: &str) -> String {
    contact[field].as_str().unwrap_or_default().to_string()
}

fn sort_contacts(content: &str) -> anyhow::Result<Vec<Value>> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| invalid_input(format!("Contacts file is not valid JSON: {e}")))?;
    let Value::Array(mut contacts) = parsed else {
        return Err(invalid_input("Contacts file must contain a JSON array"));
    };
    // Stable sort: equal names keep their input order
    contacts.sort_by_cached_key(|c| (name_key(c, "last_name"), name_key(c, "first_name")));
    Ok(contacts)
}

#[async_trait]
impl Operation for SortContactsOperation {
    fn description(&self) -> &str {
        "Sort a JSON contact list by last_name, then first_name"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let output = params.path("output")?;

        let contacts = sort_contacts(&read_text(input).await?)?;
        write_artifact(context, output, serde_json::to_string_pretty(&contacts)?).await?;

        Ok(Output::from(format!(
            "Sorted {} contacts and saved to {}",
            contacts.len(),
            output.display()
        )))
    }
}
