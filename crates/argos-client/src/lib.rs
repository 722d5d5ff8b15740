#[cfg(feature = "browser")]
pub mod browser;
pub mod engine;
pub mod http_engine;
pub mod robots;
pub mod webhook;

#[cfg(feature = "browser")]
pub use browser::{ChromiumBrowser, ChromiumFrame, ChromiumLauncher, ChromiumPage};
pub use engine::{EngineKind, EngineLauncher};
pub use http_engine::{HttpFrame, HttpLauncher, HttpPage};
pub use robots::{ReqwestRobotsPolicy, RobotsFetch, evaluate_robots};
pub use webhook::{OutboundNotifier, WebhookNotifier};

/// Product token matched against robots.txt groups.
pub const AGENT_TOKEN: &str = "ArgosBot";

/// User agent for robots.txt fetches and webhook delivery.
pub const ROBOTS_USER_AGENT: &str = "ArgosBot/0.1 (+robots.txt compliant)";

/// Page user agent when a site configuration sets none.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) ArgosBot/0.1";
