//! Render de prompts: `{{task}}` y `{{context}}`.
use serde_json::Value;

/// Plantilla usada cuando el step no declara una.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "# Task\n{{task}}\n\n# Context\n```json\n{{context}}\n```\n\nAnswer with a single JSON object that satisfies the requested schema.\n";

/// Sustituye `{{task}}` por `task` y `{{context}}` por el JSON indentado de
/// `context`. Los demás marcadores se dejan intactos.
pub fn render_prompt(template: &str, task: &str, context: &Value) -> String {
    let pretty = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    template.replace("{{task}}", task).replace("{{context}}", &pretty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_both_placeholders() {
        let out = render_prompt("Do: {{task}}\nWith: {{context}}\n{{other}}", "Plan phase 1", &json!({"a": 1}));
        assert_eq!(out, "Do: Plan phase 1\nWith: {\n  \"a\": 1\n}\n{{other}}");
    }

    #[test]
    fn default_template_carries_task_and_context() {
        let out = render_prompt(DEFAULT_PROMPT_TEMPLATE, "Summarize", &json!([]));
        assert!(out.contains("# Task\nSummarize"));
        assert!(out.contains("```json\n[]\n```"));
    }
}
