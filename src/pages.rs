//! Server-rendered pages
//!
//! Three pages exist: the index, the dashboard and the login form. The
//! index and dashboard are reached through gated routes; the login page is
//! the only one resolvable by path from the fallback.

use axum::response::Html;

use crate::config::{AppConfig, RunMode};

/// Named pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Index,
    Dashboard,
    Login,
    NotFound,
}

impl Page {
    fn title(&self) -> &'static str {
        match self {
            Page::Index => "Home",
            Page::Dashboard => "Dashboard",
            Page::Login => "Sign in",
            Page::NotFound => "Not found",
        }
    }
}

/// Per-request data available to a page
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub email: Option<String>,
}

/// Renders [`Page`]s to HTML
pub struct PageRenderer {
    login_path: String,
    development: bool,
}

impl PageRenderer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            login_path: config.auth.login_path.clone(),
            development: config.mode == RunMode::Development,
        }
    }

    /// Page served for a path by the fallback route
    pub fn resolve(&self, path: &str) -> Option<Page> {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        (path == self.login_path).then_some(Page::Login)
    }

    pub fn render(&self, page: Page, context: &PageContext) -> Html<String> {
        let body = match page {
            Page::Index => self.index(context),
            Page::Dashboard => self.dashboard(context),
            Page::Login => self.login(),
            Page::NotFound => NOT_FOUND_BODY.to_string(),
        };

        Html(layout(page.title(), &body))
    }

    fn greeting(context: &PageContext) -> String {
        match &context.email {
            Some(email) => format!("Signed in as {}", html_escape::encode_text(email)),
            None => "Signed in with an access token".to_string(),
        }
    }

    fn index(&self, context: &PageContext) -> String {
        format!(
            r#"
    <h1>HealthDash</h1>
    <p>{greeting}</p>
    <p><a href="/dashboard">Open your dashboard</a></p>
    {LOGOUT_FORM}"#,
            greeting = Self::greeting(context),
        )
    }

    fn dashboard(&self, context: &PageContext) -> String {
        format!(
            r#"
    <h1>Dashboard</h1>
    <p>{greeting}</p>
    <pre id="resources">Loading health records...</pre>
    {LOGOUT_FORM}
    <script>
      fetch("/api/dashboard", {{ credentials: "same-origin" }})
        .then((res) => res.ok ? res.json() : Promise.reject(res.status))
        .then((data) => {{
          document.getElementById("resources").textContent =
            JSON.stringify(data.resources, null, 2);
        }})
        .catch((err) => {{
          document.getElementById("resources").textContent =
            "Could not load health records (" + err + ")";
        }});
    </script>"#,
            greeting = Self::greeting(context),
        )
    }

    fn login(&self) -> String {
        let hint = if self.development {
            "<p><small>Development mode: the login link is written to the server log.</small></p>"
        } else {
            ""
        };

        format!(
            r#"
    <h1>Sign in</h1>
    <form id="login" method="post" action="/sendtoken">
      <label>Email <input type="email" name="user" required></label>
      <button type="submit">Email me a login link</button>
    </form>
    <p id="status"></p>
    {hint}
    <script>
      document.getElementById("login").addEventListener("submit", (event) => {{
        event.preventDefault();
        const user = event.target.elements.user.value;
        fetch("/sendtoken", {{
          method: "POST",
          headers: {{ "Content-Type": "application/json" }},
          body: JSON.stringify({{ user }}),
        }}).then((res) => {{
          document.getElementById("status").textContent = res.ok
            ? "Check your inbox for a login link."
            : "Please enter a valid email address.";
        }});
      }});
    </script>"#
        )
    }
}

const LOGOUT_FORM: &str = r#"<form method="post" action="/logout" onsubmit="event.preventDefault(); fetch('/logout', { method: 'POST' }).then(() => location.assign('/login'));">
      <button type="submit">Sign out</button>
    </form>"#;

const NOT_FOUND_BODY: &str = r#"
    <h1>404</h1>
    <p>This page could not be found.</p>"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title} - HealthDash</title>
</head>
<body>{body}
</body>
</html>
"#
    )
}
