use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::AppError;

/// Field name → extracted value, as produced by one extraction pass.
pub type ExtractedData = serde_json::Map<String, serde_json::Value>;

/// Declarative definition of how to scrape one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Host the configuration applies to (subdomains match too).
    pub domain: String,
    /// Path prefixes the configuration is restricted to. Empty matches any path.
    #[serde(default)]
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub extractors: Vec<Extractor>,
    #[serde(default)]
    pub options: BrowserOptions,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl SiteConfig {
    /// Returns true if `url` belongs to this site's domain and path patterns.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.trim_start_matches("www.").to_ascii_lowercase();
        let domain = self.domain.trim_start_matches("www.").to_ascii_lowercase();

        let host_matches = host == domain || host.ends_with(&format!(".{domain}"));
        if !host_matches {
            return false;
        }

        self.url_patterns.is_empty()
            || self
                .url_patterns
                .iter()
                .any(|pattern| url.path().starts_with(pattern.as_str()))
    }

    /// Instructions ordered by step, with `url` substituted into the first
    /// `navigate`. A navigate step is prepended when the site defines none.
    pub fn plan_for(&self, url: &str, instructions: &[Instruction]) -> Vec<Instruction> {
        let mut plan: Vec<Instruction> = instructions.to_vec();
        plan.sort_by_key(|i| i.step);

        match plan
            .iter_mut()
            .find(|i| matches!(i.action, Action::Navigate { .. }))
        {
            Some(first) => {
                first.action = Action::Navigate {
                    value: Some(url.to_string()),
                };
            }
            None => plan.insert(0, Instruction::navigate(0, url)),
        }

        plan
    }

    /// Semantic checks that a JSON Schema cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();

        if self.id.trim().is_empty() {
            problems.push("id must not be empty".to_string());
        }
        if self.domain.trim().is_empty() {
            problems.push("domain must not be empty".to_string());
        }

        problems.extend(step_problems(&self.instructions, &self.extractors));

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationError(format!(
                "site '{}': {}",
                self.id,
                problems.join("; ")
            )))
        }
    }
}

/// Check per-request instruction and extractor overrides with the same rules
/// a site file is held to.
pub fn validate_overrides(
    instructions: Option<&[Instruction]>,
    extractors: Option<&[Extractor]>,
) -> Result<(), AppError> {
    let problems = step_problems(instructions.unwrap_or_default(), extractors.unwrap_or_default());
    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::ValidationError(problems.join("; ")))
    }
}

fn step_problems(instructions: &[Instruction], extractors: &[Extractor]) -> Vec<String> {
    let mut problems = Vec::new();

    for instruction in instructions {
        if let Err(reason) = instruction.validate() {
            problems.push(format!("instruction {}: {reason}", instruction.step));
        }
    }

    let mut seen = HashSet::new();
    for extractor in extractors {
        if extractor.name.trim().is_empty() {
            problems.push("extractor name must not be empty".to_string());
        }
        if extractor.selector.trim().is_empty() {
            problems.push(format!("extractor '{}': selector must not be empty", extractor.name));
        }
        if !seen.insert(extractor.name.as_str()) {
            problems.push(format!("extractor '{}' is defined twice", extractor.name));
        }
    }

    problems
}

/// One step of browser automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub step: u32,
    pub description: String,
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<WaitCondition>,
    /// Failure of an optional instruction is logged and skipped.
    #[serde(default)]
    pub optional: bool,
}

impl Instruction {
    pub fn navigate(step: u32, url: &str) -> Self {
        Self {
            step,
            description: format!("Navigate to {url}"),
            action: Action::Navigate {
                value: Some(url.to_string()),
            },
            timeout_ms: None,
            wait_for: None,
            optional: false,
        }
    }

    pub fn new(step: u32, description: impl Into<String>, action: Action) -> Self {
        Self {
            step,
            description: description.into(),
            action,
            timeout_ms: None,
            wait_for: None,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_wait_for(mut self, condition: WaitCondition) -> Self {
        self.wait_for = Some(condition);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must not be empty".into());
        }
        match &self.action {
            Action::Click { selector } if selector.trim().is_empty() => {
                Err("click requires a selector".into())
            }
            Action::Type { selector, .. } if selector.trim().is_empty() => {
                Err("type requires a selector".into())
            }
            Action::Type { value, .. } if value.is_empty() => Err("type requires a value".into()),
            Action::Wait { selector: None, .. }
                if self.wait_for == Some(WaitCondition::Selector) =>
            {
                Err("wait for selector requires a selector".into())
            }
            _ => Ok(()),
        }
    }
}

/// The closed set of automation actions, tagged by `action` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Navigate {
        /// Target URL. Replaced by the requested URL for the first navigate.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Click {
        selector: String,
    },
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        /// Milliseconds to sleep for a plain timeout wait.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Type {
        selector: String,
        value: String,
    },
    Scroll {
        /// Element to scroll into view; the bottom of the document when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    /// Marker step; extraction runs as its own pass after the instructions.
    Extract {},
    Screenshot {
        /// File name under the screenshot directory.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::Wait { .. } => "wait",
            Action::Type { .. } => "type",
            Action::Scroll { .. } => "scroll",
            Action::Extract {} => "extract",
            Action::Screenshot { .. } => "screenshot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitCondition {
    Navigation,
    Selector,
    Timeout,
    NetworkIdle,
}

/// A named rule for pulling one field out of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extractor {
    pub name: String,
    pub selector: String,
    /// Attribute to read; text content when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

impl Extractor {
    pub fn text(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: None,
            multiple: false,
            required: false,
            transform: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Post-processing applied to each trimmed extracted string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    CollapseWhitespace,
    /// First numeric token, as a JSON number.
    Number,
    /// Resolve a relative link against the document URL.
    AbsoluteUrl,
}

/// Browser launch and politeness options for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserOptions {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    pub retries: u32,
    pub timeout_ms: u64,
    pub politeness_delay_ms: u64,
    pub screenshot_on_error: bool,
    pub wait_for_iframes: bool,
    pub iframe_timeout_ms: u64,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            viewport: Viewport::default(),
            retries: 3,
            timeout_ms: 30_000,
            politeness_delay_ms: 1_000,
            screenshot_on_error: false,
            wait_for_iframes: true,
            iframe_timeout_ms: 5_000,
        }
    }
}

impl BrowserOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    pub fn iframe_timeout(&self) -> Duration {
        Duration::from_millis(self.iframe_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic digest of extracted data: object keys are sorted at every
/// level before hashing, so field order never changes the hash.
pub fn content_hash(data: &serde_json::Value) -> String {
    compute_hash(&canonical_json(data))
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        serde_json::from_value(serde_json::json!({
            "id": "events",
            "name": "City events",
            "domain": "example.com",
            "urlPatterns": ["/events"],
            "instructions": [
                {"step": 2, "action": "wait", "description": "Wait for list", "waitFor": "selector", "selector": ".list"},
                {"step": 1, "action": "navigate", "description": "Open page", "value": "https://example.com/events"}
            ],
            "extractors": [
                {"name": "title", "selector": "h1", "required": true}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": {"y": [1, 2], "x": "t"}});
        let b = serde_json::json!({"a": {"x": "t", "y": [1, 2]}, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&serde_json::json!({"b": 2})));
    }

    #[test]
    fn test_site_config_defaults() {
        let site = site();
        assert!(site.enabled);
        assert_eq!(site.version, "1.0.0");
        assert_eq!(site.options.politeness_delay_ms, 1_000);
        assert!(site.options.headless);
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_instruction_action_tags() {
        let site = site();
        assert_eq!(site.instructions[0].action.kind(), "wait");
        assert_eq!(site.instructions[0].wait_for, Some(WaitCondition::Selector));
        assert_eq!(site.instructions[1].action.kind(), "navigate");
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result: Result<Instruction, _> = serde_json::from_value(serde_json::json!({
            "step": 1, "action": "teleport", "description": "nope"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_matches_domain_subdomain_and_patterns() {
        let site = site();
        assert!(site.matches(&Url::parse("https://example.com/events/today").unwrap()));
        assert!(site.matches(&Url::parse("https://www.example.com/events").unwrap()));
        assert!(site.matches(&Url::parse("https://city.example.com/events").unwrap()));
        assert!(!site.matches(&Url::parse("https://example.com/about").unwrap()));
        assert!(!site.matches(&Url::parse("https://notexample.com/events").unwrap()));
    }

    #[test]
    fn test_plan_substitutes_first_navigate_and_orders_steps() {
        let site = site();
        let plan = site.plan_for("https://example.com/events/42", &site.instructions);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].step, 1);
        assert_eq!(
            plan[0].action,
            Action::Navigate {
                value: Some("https://example.com/events/42".into())
            }
        );
    }

    #[test]
    fn test_plan_prepends_navigate_when_missing() {
        let plan = site().plan_for("https://example.com/events", &[]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action.kind(), "navigate");
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut site = site();
        site.instructions.push(Instruction::new(
            3,
            "",
            Action::Click {
                selector: "".into(),
            },
        ));
        site.extractors.push(Extractor::text("title", ""));

        let err = site.validate().unwrap_err().to_string();
        assert!(err.contains("description must not be empty"));
        assert!(err.contains("selector must not be empty"));
        assert!(err.contains("defined twice"));
    }
}
