use std::collections::HashSet;

use async_trait::async_trait;

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{read_text, write_artifact};

/// Finds the two most similar comments in a file (one comment per line)
/// and writes them, one per line, in lexical order.
pub struct SimilarCommentsOperation;

fn tokens(comment: &str) -> HashSet<String> {
    comment
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Returns the most similar pair by token Jaccard similarity. The first
/// pair found wins ties.
fn most_similar(comments: &[&str]) -> anyhow::Result<(String, String)> {
    if comments.len() < 2 {
        return Err(invalid_input("Need at least two comments to compare"));
    }
    let token_sets: Vec<_> = comments.iter().map(|c| tokens(c)).collect();

    let mut best = (0, 1, f64::MIN);
    for i in 0..comments.len() {
        for j in i + 1..comments.len() {
            let score = jaccard(&token_sets[i], &token_sets[j]);
            if score > best.2 {
                best = (i, j, score);
            }
        }
    }

    let mut pair = [comments[best.0].to_string(), comments[best.1].to_string()];
    pair.sort();
    let [first, second] = pair;
    Ok((first, second))
}

#[async_trait]
impl Operation for SimilarCommentsOperation {
    fn description(&self) -> &str {
        "Find the most similar pair of comments and write them out"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?;
        let output = params.path("output")?;

        let content = read_text(input).await?;
        let comments: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let (first, second) = most_similar(&comments)?;

        write_artifact(context, output, format!("{first}\n{second}\n")).await?;
        Ok(Output::from(format!(
            "Found the most similar pair among {} comments",
            comments.len()
        )))
    }
}
