use std::sync::Arc;
use std::time::Duration;

use argos_core::error::AppError;
use argos_core::result::{RobotsStatus, RobotsVerdict};
use argos_core::traits::RobotsPolicy;
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use robotstxt::DefaultMatcher;
use url::Url;

use crate::{AGENT_TOKEN, ROBOTS_USER_AGENT};

const ROBOTS_CACHE_TTL: Duration = Duration::from_secs(3600);
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of fetching one origin's robots.txt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsFetch {
    Body(String),
    /// 4xx: no rules, everything allowed.
    Missing,
    /// Transport error or 5xx: allowed, with the uncertainty recorded.
    Unavailable,
}

/// Decide whether `agent` may fetch `url` given a fetched robots.txt.
pub fn evaluate_robots(fetch: &RobotsFetch, agent: &str, url: &str) -> RobotsVerdict {
    let status = match fetch {
        RobotsFetch::Body(body) => {
            let mut matcher = DefaultMatcher::default();
            if matcher.one_agent_allowed_by_robots(body, agent, url) {
                RobotsStatus::Allowed
            } else {
                RobotsStatus::Disallowed
            }
        }
        RobotsFetch::Missing => RobotsStatus::NotFound,
        RobotsFetch::Unavailable => RobotsStatus::Unavailable,
    };
    RobotsVerdict::from_status(status)
}

/// `<scheme>://<host>[:port]/robots.txt` for a page URL.
pub fn robots_url(page: &Url) -> Option<Url> {
    page.host_str()?;
    page.join("/robots.txt").ok()
}

/// robots.txt policy fetched over HTTP with its own user agent, cached per
/// origin for an hour. Unavailable results are not cached.
#[derive(Clone)]
pub struct ReqwestRobotsPolicy {
    client: Client,
    agent: String,
    cache: Cache<String, Arc<RobotsFetch>>,
}

impl ReqwestRobotsPolicy {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(ROBOTS_USER_AGENT)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("robots.txt client: {e}")))?;

        Ok(Self {
            client,
            agent: AGENT_TOKEN.to_string(),
            cache: Cache::builder()
                .max_capacity(1_024)
                .time_to_live(ROBOTS_CACHE_TTL)
                .build(),
        })
    }

    async fn fetch(&self, robots: &Url) -> RobotsFetch {
        let response = match self.client.get(robots.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %robots, error = %e, "robots.txt unreachable, allowing");
                return RobotsFetch::Unavailable;
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(body) => RobotsFetch::Body(body),
                Err(e) => {
                    tracing::warn!(url = %robots, error = %e, "robots.txt unreadable, allowing");
                    RobotsFetch::Unavailable
                }
            }
        } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            RobotsFetch::Missing
        } else {
            tracing::warn!(url = %robots, status = status.as_u16(), "robots.txt unavailable, allowing");
            RobotsFetch::Unavailable
        }
    }
}

impl RobotsPolicy for ReqwestRobotsPolicy {
    async fn check(&self, url: &str) -> RobotsVerdict {
        let Some((origin, robots)) = Url::parse(url)
            .ok()
            .and_then(|page| Some((page.origin().ascii_serialization(), robots_url(&page)?)))
        else {
            return RobotsVerdict::from_status(RobotsStatus::Unavailable);
        };

        let fetched = match self.cache.get(&origin).await {
            Some(hit) => hit,
            None => {
                let fetched = Arc::new(self.fetch(&robots).await);
                if *fetched != RobotsFetch::Unavailable {
                    self.cache.insert(origin, fetched.clone()).await;
                }
                fetched
            }
        };

        let verdict = evaluate_robots(&fetched, &self.agent, url);
        tracing::debug!(%url, status = ?verdict.status, "robots.txt checked");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RULES: &str = "\
User-agent: *
Disallow: /private/

User-agent: ArgosBot
Disallow: /no-argos/
Allow: /
";

    #[test]
    fn test_allowed_path() {
        let fetch = RobotsFetch::Body(RULES.to_string());
        let verdict = evaluate_robots(&fetch, "ArgosBot", "https://example.com/events");
        assert!(verdict.allowed);
        assert_eq!(verdict.status, RobotsStatus::Allowed);
    }

    #[test]
    fn test_agent_specific_group_applies() {
        let fetch = RobotsFetch::Body(RULES.to_string());
        let verdict = evaluate_robots(&fetch, "ArgosBot", "https://example.com/no-argos/page");
        assert!(!verdict.allowed);
        assert_eq!(verdict.status, RobotsStatus::Disallowed);

        let other = evaluate_robots(&fetch, "OtherBot", "https://example.com/private/x");
        assert!(!other.allowed);
    }

    #[test]
    fn test_missing_and_unavailable_fail_open() {
        let missing = evaluate_robots(&RobotsFetch::Missing, "ArgosBot", "https://a.com/");
        assert!(missing.allowed);
        assert_eq!(missing.status, RobotsStatus::NotFound);

        let down = evaluate_robots(&RobotsFetch::Unavailable, "ArgosBot", "https://a.com/");
        assert!(down.allowed);
        assert_eq!(down.status, RobotsStatus::Unavailable);
    }

    #[test]
    fn test_robots_url() {
        let page = Url::parse("https://example.com:8443/a/b?q=1#frag").unwrap();
        assert_eq!(
            robots_url(&page).unwrap().as_str(),
            "https://example.com:8443/robots.txt"
        );
        let data = Url::parse("data:text/plain,hello").unwrap();
        assert!(robots_url(&data).is_none());
    }

    #[tokio::test]
    async fn test_unparseable_url_fails_open() {
        let policy = ReqwestRobotsPolicy::new().unwrap();
        let verdict = policy.check("not a url").await;
        assert!(verdict.allowed);
        assert_eq!(verdict.status, RobotsStatus::Unavailable);
    }

    /// Serve a fixed robots.txt response on a fresh local origin and count
    /// how often it is fetched.
    async fn serve_robots(
        status: axum::http::StatusCode,
        body: &'static str,
    ) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/robots.txt",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (status, body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn test_not_found_allows_and_is_cached() {
        let (origin, hits) = serve_robots(axum::http::StatusCode::NOT_FOUND, "").await;
        let policy = ReqwestRobotsPolicy::new().unwrap();

        let verdict = policy.check(&format!("{origin}/events")).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.status, RobotsStatus::NotFound);

        policy.check(&format!("{origin}/other")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_allows_and_is_not_cached() {
        let (origin, hits) =
            serve_robots(axum::http::StatusCode::SERVICE_UNAVAILABLE, "down").await;
        let policy = ReqwestRobotsPolicy::new().unwrap();

        let verdict = policy.check(&format!("{origin}/events")).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.status, RobotsStatus::Unavailable);

        let again = policy.check(&format!("{origin}/events")).await;
        assert_eq!(again.status, RobotsStatus::Unavailable);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_too_many_requests_is_unavailable() {
        let (origin, _hits) = serve_robots(axum::http::StatusCode::TOO_MANY_REQUESTS, "").await;
        let policy = ReqwestRobotsPolicy::new().unwrap();

        let verdict = policy.check(&format!("{origin}/")).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.status, RobotsStatus::Unavailable);
    }

    #[tokio::test]
    async fn test_disallow_rules_are_cached_per_origin() {
        let (origin, hits) = serve_robots(
            axum::http::StatusCode::OK,
            "User-agent: *\nDisallow: /private/\n",
        )
        .await;
        let policy = ReqwestRobotsPolicy::new().unwrap();

        let blocked = policy.check(&format!("{origin}/private/report")).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.status, RobotsStatus::Disallowed);

        let open = policy.check(&format!("{origin}/public")).await;
        assert!(open.allowed);
        assert_eq!(open.status, RobotsStatus::Allowed);

        let blocked_again = policy.check(&format!("{origin}/private/other")).await;
        assert_eq!(blocked_again.status, RobotsStatus::Disallowed);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
