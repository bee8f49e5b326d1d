use async_trait::async_trait;
use wright_core::stream::ToolParams;
use wright_core::tools::{Tool, ToolContext, ToolError};

use super::param;

pub const ASK_FOLLOWUP: &str = "ask-followup-question";

/// Returns the question verbatim; the coordinator streams it to the user and
/// the orchestrator ends the task.
pub struct AskFollowupTool;

#[async_trait]
impl Tool for AskFollowupTool {
    fn name(&self) -> &str {
        ASK_FOLLOWUP
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for the answer"
    }

    fn required_params(&self) -> &[&'static str] {
        &["question"]
    }

    async fn execute(&self, params: &ToolParams, _ctx: &ToolContext) -> Result<String, ToolError> {
        Ok(param(params, "question").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{ctx, params};

    #[tokio::test]
    async fn echoes_question() {
        let out = AskFollowupTool
            .execute(&params(&[("question", "Which database?")]), &ctx(&std::env::temp_dir()))
            .await
            .unwrap();
        assert_eq!(out, "Which database?");
    }
}
