use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{read_text, write_artifact};

static FROM_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^from:\s*(.+)$").expect("valid regex"));

static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid regex")
});

/// Extracts the sender's address from a raw email message.
pub struct EmailSenderOperation;

/// Prefers the address on the `From:` header; falls back to the first
/// address anywhere in the message.
fn sender_address(message: &str) -> Option<&str> {
    FROM_HEADER
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|header| ADDRESS.find(header.as_str()))
        .or_else(|| ADDRESS.find(message))
        .map(|m| m.as_str())
}

#[async_trait]
impl Operation for EmailSenderOperation {
    fn description(&self) -> &str {
        "Extract the sender's email address from a message"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let output = params.path("output")?;

        let message = read_text(input).await?;
        let sender = sender_address(&message)
            .ok_or_else(|| invalid_input("No email address found in the message"))?
            .to_string();

        write_artifact(context, output, &sender).await?;
        Ok(Output::from(format!("Sender: {sender}")))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Workspace;
    use super::*;
    use crate::operations::TaskParams;

    #[test]
    fn test_sender_from_header() {
        let message = "To: bob@example.com\nFrom: \"Alice\" <alice@example.org>\nSubject: hi\n\nbody";
        assert_eq!(sender_address(message), Some("alice@example.org"));
    }

    #[test]
    fn test_sender_header_is_case_insensitive() {
        assert_eq!(sender_address("FROM: carol@x.io\n"), Some("carol@x.io"));
    }

    #[test]
    fn test_sender_falls_back_to_first_address() {
        assert_eq!(
            sender_address("Please reply to dave@corp.net soon"),
            Some("dave@corp.net")
        );
        assert_eq!(sender_address("no address here"), None);
    }

    #[tokio::test]
    async fn test_execute_writes_sender() {
        let ws = Workspace::new();
        ws.write("email.txt", "From: Eve <eve@example.com>\nTo: x@y.com\n\nHello");
        let params = ws.params(
            TaskParams::new()
                .with_path("input", "email.txt")
                .with_path("output", "email-sender.txt"),
        );
        EmailSenderOperation.execute(&params, &ws.context).await.unwrap();
        assert_eq!(ws.read("email-sender.txt"), "eve@example.com");
    }

    #[tokio::test]
    async fn test_execute_without_address_is_invalid_input() {
        let ws = Workspace::new();
        ws.write("email.txt", "nothing useful");
        let params = ws.params(
            TaskParams::new()
                .with_path("input", "email.txt")
                .with_path("output", "email-sender.txt"),
        );
        let err = EmailSenderOperation.execute(&params, &ws.context).await.unwrap_err();
        assert!(err.downcast_ref::<crate::operations::InvalidInput>().is_some());
        assert!(!ws.exists("email-sender.txt"));
    }
}
