//! Playground pipeline: validate, harden, execute.

use serde::Serialize;
use std::sync::Arc;

use codementor_core::config::SandboxSettings;
use codementor_core::{
    ConsoleEvent, Error, ExecutionRequest, ExecutionResult, Language, Project, ProjectId,
    ProjectStore, Result,
};

use crate::boundary::{BoundaryLimits, JsBoundary};
use crate::container::{ContainerConfig, ContainerState, SandboxContainer};
use crate::loop_guard::harden_loops;
use crate::policy::escape_html;
use crate::validator::SafetyValidator;

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Advisory findings, tagged with the panel they came from.
    pub warnings: Vec<(Language, String)>,
    pub result: ExecutionResult,
    pub console: Vec<ConsoleEvent>,
    pub document: Option<String>,
}

pub struct Playground {
    validator: SafetyValidator,
    container: SandboxContainer,
    harden: bool,
    max_iterations: u64,
}

impl Playground {
    /// Playground backed by script engine boundaries.
    pub fn new(settings: &SandboxSettings) -> Self {
        let launcher = Arc::new(JsBoundary::new(BoundaryLimits::from(settings)));
        let container = SandboxContainer::new(launcher, ContainerConfig::from(settings));
        Self::with_container(container, settings)
    }

    pub fn with_container(container: SandboxContainer, settings: &SandboxSettings) -> Self {
        Self {
            validator: SafetyValidator::new().with_max_length(settings.max_code_length),
            container,
            harden: settings.harden_loops,
            max_iterations: settings.max_loop_iterations,
        }
    }

    pub fn container(&self) -> &SandboxContainer {
        &self.container
    }

    /// Validate every panel, refuse unsafe code, then execute.
    ///
    /// Runtime errors and timeouts are part of the report. Only refusals
    /// and container failures come back as `Err`.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<RunReport> {
        let panels = [
            (Language::Html, request.html.as_str()),
            (Language::Css, request.css.as_str()),
            (Language::Javascript, request.js.as_str()),
        ];

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for (language, code) in panels {
            let report = self.validator.validate(code, language);
            errors.extend(report.errors);
            warnings.extend(report.warnings.into_iter().map(|w| (language, w)));
        }
        if !errors.is_empty() {
            tracing::info!(errors = errors.len(), "Run refused by safety validator");
            return Err(Error::UnsafeCode(errors));
        }

        let js = if self.harden {
            harden_loops(&request.js, self.max_iterations)
        } else {
            request.js.clone()
        };

        if !matches!(
            self.container.state(),
            ContainerState::Created | ContainerState::Executing
        ) {
            self.container.create()?;
        }

        let mut events = self.container.subscribe();
        let outcome = self.container.execute(&request.html, &request.css, &js).await;
        let result = ExecutionResult::from_outcome(outcome)?;

        let mut console = Vec::new();
        while let Ok(event) = events.try_recv() {
            console.push(event);
        }

        tracing::info!(
            success = result.is_success(),
            console_events = console.len(),
            warnings = warnings.len(),
            "Playground run finished"
        );

        Ok(RunReport {
            warnings,
            result,
            console,
            document: self.container.rendered(),
        })
    }

    /// Load a saved project and run it.
    pub async fn run_stored(&self, store: &dyn ProjectStore, id: &ProjectId) -> Result<RunReport> {
        let project = store.load_project(id).await?;
        self.run(&project.to_request()).await
    }
}

// =============================================================================
// Export
// =============================================================================

/// A project rendered as one downloadable HTML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedProject {
    pub filename: String,
    pub html: String,
}

/// Render `project` as a standalone page with its style and script inlined.
pub fn export_project(project: &Project) -> ExportedProject {
    let title = if project.title.trim().is_empty() {
        "My Project"
    } else {
        project.title.as_str()
    };

    let html = format!(
        concat!(
            "<!DOCTYPE html>\n",
            "<html lang=\"en\">\n",
            "<head>\n",
            "  <meta charset=\"UTF-8\">\n",
            "  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
            "  <title>{title}</title>\n",
            "  <style>\n{css}\n  </style>\n",
            "</head>\n",
            "<body>\n{html}\n",
            "  <script>\n{js}\n  </script>\n",
            "</body>\n",
            "</html>\n"
        ),
        title = escape_html(title),
        css = project.css,
        html = project.html,
        js = project.js,
    );

    ExportedProject {
        filename: format!("{}.html", slug(&project.title)),
        html,
    }
}

/// Load a saved project and export it.
pub async fn export_stored(store: &dyn ProjectStore, id: &ProjectId) -> Result<ExportedProject> {
    let project = store.load_project(id).await?;
    Ok(export_project(&project))
}

fn slug(title: &str) -> String {
    if title.is_empty() {
        return "project".to_string();
    }
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{MockBehavior, MockBoundary};
    use codementor_core::mocks::InMemoryProjectStore;
    use codementor_core::ConsoleLevel;

    fn playground(mock: MockBoundary) -> (Playground, Arc<MockBoundary>) {
        let mock = Arc::new(mock);
        let container = SandboxContainer::new(mock.clone(), ContainerConfig::default());
        (Playground::with_container(container, &SandboxSettings::default()), mock)
    }

    #[tokio::test]
    async fn test_unsafe_code_never_reaches_a_boundary() {
        let (playground, mock) = playground(MockBoundary::default());
        let err = playground
            .run(&ExecutionRequest::new("", "", "eval('1')"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeCode(ref reasons) if reasons.iter().any(|r| r.contains("eval()"))));
        assert_eq!(mock.launches(), 0);
    }

    #[tokio::test]
    async fn test_run_hardens_and_collects_console() {
        let (playground, mock) = playground(MockBoundary::default().with_console(ConsoleLevel::Log, &["x"]));
        let report = playground
            .run(&ExecutionRequest::new("<h1>Hi</h1>", "", "let i = 0; while (i < 3) { i++; } console.log('x');"))
            .await
            .unwrap();

        assert!(report.result.is_success());
        assert_eq!(report.console.len(), 1);
        assert!(report.document.unwrap().contains("<h1>Hi</h1>"));

        let sent = mock.received();
        let crate::protocol::Message::Execute(request) = &sent[0].message else {
            panic!("expected execute");
        };
        assert!(request.js.contains("__loopGuard_0"));
    }

    #[tokio::test]
    async fn test_runtime_error_is_reported_not_returned() {
        let (playground, _) = playground(MockBoundary::new(MockBehavior::Fail("boom".into())));
        let report = playground
            .run(&ExecutionRequest::new("", "", "throw new Error('boom')"))
            .await
            .unwrap();
        assert!(matches!(report.result, ExecutionResult::RuntimeError { ref message, .. } if message == "boom"));
    }

    #[tokio::test]
    async fn test_warnings_are_tagged_by_panel() {
        let (playground, _) = playground(MockBoundary::default());
        let report = playground
            .run(&ExecutionRequest::new("", "", "for (;;) { break; }"))
            .await
            .unwrap();
        assert!(!report.warnings.is_empty());
        assert!(report.warnings.iter().all(|(language, _)| *language == Language::Javascript));
    }

    #[tokio::test]
    async fn test_run_stored_project() {
        let store = InMemoryProjectStore::new();
        store.insert(
            ProjectId("p1".into()),
            Project {
                title: "Demo".into(),
                html: "<p>saved</p>".into(),
                ..Default::default()
            },
        );
        let (playground, _) = playground(MockBoundary::default());
        let report = playground.run_stored(&store, &ProjectId("p1".into())).await.unwrap();
        assert!(report.document.unwrap().contains("<p>saved</p>"));

        let missing = playground.run_stored(&store, &ProjectId("nope".into())).await;
        assert!(matches!(missing, Err(Error::ProjectNotFound(_))));
    }

    #[test]
    fn test_export_project() {
        let project = Project {
            title: "My Cool Page!".into(),
            html: "<h1>Hi</h1>".into(),
            css: "h1 { color: red; }".into(),
            js: "console.log(1)".into(),
        };
        let exported = export_project(&project);
        assert_eq!(exported.filename, "my-cool-page-.html");
        assert!(exported.html.contains("<title>My Cool Page!</title>"));
        assert!(exported.html.contains("h1 { color: red; }"));
        assert!(exported.html.contains("<script>\nconsole.log(1)\n  </script>"));

        let untitled = export_project(&Project::default());
        assert_eq!(untitled.filename, "project.html");
        assert!(untitled.html.contains("<title>My Project</title>"));
    }
}
