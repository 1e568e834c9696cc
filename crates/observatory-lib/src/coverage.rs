//! Coverage check between a reverse proxy configuration and monitored targets
//!
//! Finds nginx `location` blocks that proxy to a local port and reports the
//! ones whose upstream port no target probes.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::Target;

/// A `location` block that forwards to an upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyLocation {
    pub location: String,
    pub proxy_pass: String,
    /// Upstream port, when the `proxy_pass` address carries one
    pub port: Option<u16>,
}

/// A proxied location with no matching target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageGap {
    #[serde(flatten)]
    pub location: ProxyLocation,
    /// Probe URL that would cover this location
    pub suggested_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub covered: Vec<ProxyLocation>,
    pub gaps: Vec<CoverageGap>,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"location\s+(?:[=~^*]+\s*)?(\S+)\s*\{").expect("static regex")
    })
}

fn proxy_pass_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"proxy_pass\s+([^;\s]+)\s*;").expect("static regex"))
}

fn port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]+://[^/:]+:(\d+)").expect("static regex"))
}

/// Extract every `location` block containing a `proxy_pass` directive.
///
/// Block bodies are delimited by brace depth, so nested blocks are part of
/// their parent. Comments are stripped first.
pub fn parse_nginx_locations(config: &str) -> Vec<ProxyLocation> {
    let text: String = config
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");

    let mut locations = Vec::new();
    for captures in location_re().captures_iter(&text) {
        let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        let body = block_body(&text[whole.end()..]);
        if let Some(pass) = proxy_pass_re().captures(body).and_then(|c| c.get(1)) {
            let proxy_pass = pass.as_str().to_string();
            locations.push(ProxyLocation {
                location: path.as_str().to_string(),
                port: extract_port(&proxy_pass),
                proxy_pass,
            });
        }
    }
    locations
}

/// Text up to the brace closing the block that was just opened
fn block_body(rest: &str) -> &str {
    let mut depth = 1usize;
    for (i, ch) in rest.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &rest[..i];
                }
            }
            _ => {}
        }
    }
    rest
}

/// Explicit port of a `scheme://host:port/...` address
pub fn extract_port(address: &str) -> Option<u16> {
    port_re()
        .captures(address)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Port a target is probed on, defaulting by scheme
fn target_port(target: &Target) -> Option<u16> {
    Url::parse(&target.url)
        .ok()
        .and_then(|url| url.port_or_known_default())
}

/// Compare proxied locations with the ports targets probe
pub fn check_coverage(locations: &[ProxyLocation], targets: &[Target]) -> CoverageReport {
    let probed: HashSet<u16> = targets.iter().filter_map(target_port).collect();

    let mut report = CoverageReport::default();
    for location in locations {
        match location.port {
            Some(port) if probed.contains(&port) => report.covered.push(location.clone()),
            port => report.gaps.push(CoverageGap {
                suggested_url: port.map(|p| format!("http://127.0.0.1:{p}{}", location.location)),
                location: location.clone(),
            }),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r#"
server {
    listen 443 ssl;
    server_name example.com;

    location / {
        root /var/www/html;
    }

    location /api/ {
        proxy_pass http://127.0.0.1:8080/;
        proxy_set_header Host $host;
    }

    location ^~ /grafana/ {
        if ($request_method = POST) {
            return 405;
        }
        proxy_pass http://localhost:3000;
    }

    # location /old/ { proxy_pass http://127.0.0.1:9999; }

    location = /hooks {
        proxy_pass http://unix:/run/hooks.sock;
    }
}
"#;

    fn target(url: &str) -> Target {
        Target {
            slug: "t".to_string(),
            name: "T".to_string(),
            description: String::new(),
            link: String::new(),
            url: url.to_string(),
            host: None,
            threshold_ms: None,
        }
    }

    #[test]
    fn test_parse_locations() {
        let locations = parse_nginx_locations(SITE);
        let paths: Vec<&str> = locations.iter().map(|l| l.location.as_str()).collect();

        assert_eq!(paths, vec!["/api/", "/grafana/", "/hooks"]);
        assert_eq!(locations[0].port, Some(8080));
        assert_eq!(locations[1].port, Some(3000));
        assert_eq!(locations[2].port, None);
    }

    #[test]
    fn test_extract_port() {
        assert_eq!(extract_port("http://127.0.0.1:8080/"), Some(8080));
        assert_eq!(extract_port("https://backend:8443"), Some(8443));
        assert_eq!(extract_port("http://backend"), None);
        assert_eq!(extract_port("http://unix:/run/x.sock"), None);
    }

    #[test]
    fn test_check_coverage() {
        let locations = parse_nginx_locations(SITE);
        let targets = vec![target("http://127.0.0.1:8080/health")];

        let report = check_coverage(&locations, &targets);

        assert!(!report.is_complete());
        assert_eq!(report.covered.len(), 1);
        assert_eq!(report.gaps.len(), 2);
        assert_eq!(
            report.gaps[0].suggested_url.as_deref(),
            Some("http://127.0.0.1:3000/grafana/")
        );
        assert_eq!(report.gaps[1].suggested_url, None);
    }

    #[test]
    fn test_default_port_counts() {
        let locations = vec![ProxyLocation {
            location: "/".to_string(),
            proxy_pass: "http://127.0.0.1:80".to_string(),
            port: Some(80),
        }];
        let report = check_coverage(&locations, &[target("http://127.0.0.1/")]);
        assert!(report.is_complete());
    }
}
