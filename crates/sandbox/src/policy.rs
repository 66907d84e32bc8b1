//! Content policy applied to every boundary.
//!
//! The directive set is rendered into the boundary document as a
//! `Content-Security-Policy` meta tag. Inside the script engine the same
//! policy is enforced by replacing network and storage globals with stubs
//! that throw.

use serde::Serialize;

/// Fixed policy for a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentPolicy {
    directives: Vec<(&'static str, Vec<&'static str>)>,
    permissions: Vec<&'static str>,
    blocked_globals: Vec<&'static str>,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            directives: vec![
                ("default-src", vec!["'none'"]),
                ("script-src", vec!["'unsafe-inline'", "'unsafe-eval'"]),
                ("style-src", vec!["'unsafe-inline'", "data:"]),
                ("img-src", vec!["data:", "blob:", "https:"]),
                ("font-src", vec!["data:"]),
                ("connect-src", vec!["'none'"]),
                ("frame-src", vec!["'none'"]),
                ("object-src", vec!["'none'"]),
                ("base-uri", vec!["'none'"]),
            ],
            // Scripts only: no same-origin, forms, popups or modals.
            permissions: vec!["allow-scripts"],
            blocked_globals: vec![
                "fetch",
                "XMLHttpRequest",
                "WebSocket",
                "EventSource",
                "localStorage",
                "sessionStorage",
                "indexedDB",
                "importScripts",
            ],
        }
    }
}

impl ContentPolicy {
    /// Header value, e.g. `default-src 'none'; script-src …`.
    pub fn csp(&self) -> String {
        self.directives
            .iter()
            .map(|(name, values)| format!("{} {}", name, values.join(" ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Value of the frame `sandbox` attribute.
    pub fn sandbox_attribute(&self) -> String {
        self.permissions.join(" ")
    }

    pub fn allows(&self, permission: &str) -> bool {
        self.permissions.contains(&permission)
    }

    /// Globals replaced by throwing stubs inside the boundary.
    pub fn blocked_globals(&self) -> &[&'static str] {
        &self.blocked_globals
    }

    /// Whether the policy opens any outbound channel.
    pub fn allows_network(&self) -> bool {
        self.directives
            .iter()
            .find(|(name, _)| *name == "connect-src")
            .map_or(false, |(_, values)| values.iter().any(|v| *v != "'none'"))
    }

    /// Boundary document for one run: policy meta, user style, an error
    /// banner when the run failed, then the application markup.
    pub fn render_document(&self, css: &str, app_html: &str, error: Option<&ErrorBanner>) -> String {
        let banner = error.map(ErrorBanner::render).unwrap_or_default();
        format!(
            concat!(
                "<!DOCTYPE html>\n",
                "<html>\n",
                "<head>\n",
                "<meta charset=\"UTF-8\">\n",
                "<meta http-equiv=\"Content-Security-Policy\" content=\"{csp}\">\n",
                "<style>{base}</style>\n",
                "<style id=\"custom-style\">{css}</style>\n",
                "</head>\n",
                "<body>\n",
                "{banner}",
                "<div id=\"app\">{app}</div>\n",
                "</body>\n",
                "</html>\n"
            ),
            csp = self.csp(),
            base = BASE_STYLE,
            css = css.replace("</style", "<\\/style"),
            banner = banner,
            app = app_html,
        )
    }
}

const BASE_STYLE: &str = "body { margin: 0; padding: 20px; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; background: #fff; } \
.error-message { background: #fee; border: 1px solid #fcc; border-radius: 8px; padding: 16px; margin: 16px 0; color: #c33; } \
.error-message pre { margin: 0; font-family: 'Courier New', monospace; font-size: 13px; white-space: pre-wrap; }";

/// Inline banner shown in place of an uncaught error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub message: String,
    pub location: Option<(u32, u32)>,
}

impl ErrorBanner {
    pub fn new(message: impl Into<String>, location: Option<(u32, u32)>) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }

    fn render(&self) -> String {
        let location = self
            .location
            .map(|(line, column)| format!("\n at line {}, column {}", line, column))
            .unwrap_or_default();
        format!(
            "<div class=\"error-message\"><h3>JavaScript Error</h3><pre>{}{}</pre></div>\n",
            escape_html(&self.message),
            location
        )
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
