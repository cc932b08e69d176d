use apiary_agent::AgentHandler;
use apiary_core::{AgentConfig, ApiaryError, ApiaryResult, TaskContext};
use async_trait::async_trait;
use tracing::info;

const HEADLINE_TEMPLATES: &[&str] = &[
    "{product}: built for {audience}",
    "Meet {product}",
    "Why {audience} choose {product}",
    "{product}, finally",
];

const BODY_TEMPLATES: &[&str] = &[
    "Everything {audience} need, nothing they don't. Try {product} today.",
    "{product} does the heavy lifting so {audience} can focus on what matters.",
    "Join thousands of {audience} already using {product}.",
];

/// Generates ad-copy variants from templates.
pub struct CreativeWriterAgent {
    config: AgentConfig,
}

impl CreativeWriterAgent {
    /// Default agent id.
    pub const ID: &'static str = "creative-writer";

    /// Create the writer with its default configuration.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::new(Self::ID, 3)
                .with_capability("creative.generate")
                .with_dependency("campaign-planner"),
        }
    }
}

impl Default for CreativeWriterAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn render(template: &str, product: &str, audience: &str) -> String {
    template
        .replace("{product}", product)
        .replace("{audience}", audience)
}

#[async_trait]
impl AgentHandler for CreativeWriterAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        input: serde_json::Value,
        _ctx: &TaskContext,
    ) -> ApiaryResult<serde_json::Value> {
        let product = input
            .get("product")
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ApiaryError::Validation("creative.generate requires a 'product'".to_string())
            })?;
        let audience = input
            .get("audience")
            .and_then(|v| v.as_str())
            .unwrap_or("teams");
        let format = input
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("search_text");
        let count = input
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(3)
            .min(HEADLINE_TEMPLATES.len() as u64) as usize;

        let variants: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "format": format,
                    "headline": render(HEADLINE_TEMPLATES[i], product, audience),
                    "body": render(BODY_TEMPLATES[i % BODY_TEMPLATES.len()], product, audience),
                })
            })
            .collect();

        info!(product, format, variants = variants.len(), "Creatives generated");
        Ok(serde_json::json!({
            "product": product,
            "format": format,
            "variants": variants,
        }))
    }
}
