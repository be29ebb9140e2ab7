//! Free-text financial analysis behind the `analyze` tool

use crate::gemini::GeminiClient;
use crate::Result;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, data: &str) -> Result<String>;
}

pub fn analysis_prompt(data: &str) -> String {
    format!(
        r#"You are a financial analysis assistant. Analyze the following data and provide insights:

{}

Provide a clear, structured analysis with:
📌 Key Findings
📊 Spending Patterns
🧩 Correlations
✅ Recommendations

Format output to be visually easy to read in plain text with tables and bullet points where appropriate."#,
        data.trim()
    )
}

#[async_trait]
impl Analyst for GeminiClient {
    async fn analyze(&self, data: &str) -> Result<String> {
        info!(model = self.model(), chars = data.len(), "running analysis");
        self.generate(&analysis_prompt(data)).await
    }
}
