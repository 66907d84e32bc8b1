//! Static safety validator.
//!
//! Pattern based pre-flight check run on every editor panel before anything
//! reaches a boundary. Matching is textual and deliberately conservative: a
//! benign string literal that happens to contain `fetch(` is still rejected.

use regex::Regex;
use std::sync::OnceLock;

use codementor_core::{Language, ValidationReport};

/// Input longer than this many characters draws a warning.
pub const MAX_CODE_LENGTH: usize = 50_000;

/// A compiled pattern and the construct it names in user-facing messages.
struct Rule {
    regex: Regex,
    construct: &'static str,
}

impl Rule {
    fn new(pattern: &str, construct: &'static str) -> Self {
        Self {
            regex: Regex::new(pattern).unwrap(),
            construct,
        }
    }
}

/// Validator holding every compiled rule set.
pub struct SafetyValidator {
    disallowed: Vec<Rule>,
    script_only: Vec<Rule>,
    risky: Vec<Rule>,
    while_true_block: Regex,
    constant_while: Regex,
    named_function: Regex,
    max_length: usize,
}

impl SafetyValidator {
    pub fn new() -> Self {
        let disallowed = vec![
            Rule::new(r"(?i)<script[^>]*>[\s\S]*?</script>", "inline <script> tags"),
            Rule::new(r"(?i)javascript:", "javascript: URLs"),
            Rule::new(r#"(?i)on\w+\s*=\s*["'][^"']*["']"#, "inline event handler attributes"),
            Rule::new(r"(?i)document\.write", "document.write"),
            Rule::new(r"(?i)eval\s*\(", "eval()"),
            Rule::new(r"(?i)Function\s*\(", "the Function constructor"),
            Rule::new(r"(?i)fetch\s*\(", "fetch()"),
            Rule::new(r"(?i)XMLHttpRequest", "XMLHttpRequest"),
            Rule::new(r"(?i)\.ajax\s*\(", "$.ajax()"),
            Rule::new(r"(?i)localStorage", "localStorage"),
            Rule::new(r"(?i)sessionStorage", "sessionStorage"),
            Rule::new(r"(?i)indexedDB", "indexedDB"),
            Rule::new(r"(?i)window\.opener", "window.opener"),
            Rule::new(r"(?i)window\.parent", "window.parent"),
            Rule::new(r"(?i)window\.top", "window.top"),
        ];

        let script_only = vec![Rule::new(
            r#"(setTimeout|setInterval)\s*\(\s*["'`]"#,
            "setTimeout/setInterval with a string argument",
        )];

        let risky = vec![
            Rule::new(r"(?i)while\s*\(\s*true\s*\)", "while (true)"),
            Rule::new(r"(?i)for\s*\(\s*;\s*;\s*\)", "for (;;)"),
        ];

        Self {
            disallowed,
            script_only,
            risky,
            while_true_block: Regex::new(r"while\s*\(\s*true\s*\)\s*\{[^}]*\}").unwrap(),
            constant_while: Regex::new(r#"while\s*\(\s*(1|"[^"]*"|'[^']*')\s*\)"#).unwrap(),
            named_function: Regex::new(r"function\s+(\w+)\s*\([^)]*\)\s*\{([^}]*)\}").unwrap(),
            max_length: MAX_CODE_LENGTH,
        }
    }

    /// Override the oversized-input threshold.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Check one editor panel.
    pub fn validate(&self, code: &str, language: Language) -> ValidationReport {
        if code.trim().is_empty() {
            return ValidationReport::clean();
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for rule in &self.disallowed {
            if rule.regex.is_match(code) {
                errors.push(format!(
                    "Potentially unsafe code detected: {} is not allowed in the sandbox.",
                    rule.construct
                ));
            }
        }

        for rule in &self.risky {
            if rule.regex.is_match(code) {
                warnings.push(format!(
                    "Your code contains {}, which might loop forever. Make sure your loops have a proper exit condition.",
                    rule.construct
                ));
            }
        }

        if language == Language::Javascript {
            for rule in &self.script_only {
                if rule.regex.is_match(code) {
                    errors.push(format!(
                        "Potentially unsafe code detected: {} is not allowed in the sandbox.",
                        rule.construct
                    ));
                }
            }
            warnings.extend(self.loop_diagnostics(code));
        }

        let length = code.chars().count();
        if length > self.max_length {
            warnings.push(format!(
                "Your code is very long ({} characters). Keeping it under {} characters avoids slow previews.",
                length, self.max_length
            ));
        }

        if !errors.is_empty() {
            tracing::debug!(
                language = %language,
                errors = errors.len(),
                "Code rejected by safety validator"
            );
        }

        ValidationReport::new(errors, warnings)
    }

    fn loop_diagnostics(&self, code: &str) -> Vec<String> {
        let mut issues = Vec::new();

        for block in self.while_true_block.find_iter(code) {
            let body = block.as_str();
            if !body.contains("break") && !body.contains("return") {
                issues.push("Potential infinite loop: while (true) without break or return".to_string());
            }
        }

        if has_empty_increment_for(code) {
            issues.push("Potential infinite loop: for loop with an empty increment".to_string());
        }

        if self.constant_while.is_match(code) {
            issues.push("Potential infinite loop: while loop with a constant truthy condition".to_string());
        }

        for caps in self.named_function.captures_iter(code) {
            let name = &caps[1];
            let body = &caps[2];
            if body.contains(name)
                && !body.contains("return")
                && !body.contains("if")
                && !body.contains("break")
            {
                issues.push(format!(
                    "Potential infinite recursion: function {} calls itself without a base case",
                    name
                ));
            }
        }

        if code.contains("setInterval") && !code.contains("clearInterval") {
            issues.push(
                "setInterval is used without clearInterval; the timer will keep running.".to_string(),
            );
        }

        issues
    }
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// `for (init; test; )` headers whose update clause is blank.
fn has_empty_increment_for(code: &str) -> bool {
    static EMPTY_INCREMENT: OnceLock<Regex> = OnceLock::new();
    EMPTY_INCREMENT
        .get_or_init(|| Regex::new(r"for\s*\([^;()]*;[^;()]*;\s*\)").unwrap())
        .is_match(code)
}

/// Validate with the shared default rule set.
pub fn validate_code(code: &str, language: Language) -> ValidationReport {
    static VALIDATOR: OnceLock<SafetyValidator> = OnceLock::new();
    VALIDATOR.get_or_init(SafetyValidator::new).validate(code, language)
}

/// Strip script blocks, inline handlers and `javascript:` URLs from markup.
pub fn sanitize_html(html: &str) -> String {
    static STRIP: OnceLock<[Regex; 3]> = OnceLock::new();
    let [scripts, handlers, js_urls] = STRIP.get_or_init(|| {
        [
            Regex::new(r"(?i)<script[^>]*>[\s\S]*?</script>").unwrap(),
            Regex::new(r#"(?i)on\w+\s*=\s*["'][^"']*["']"#).unwrap(),
            Regex::new(r"(?i)javascript:").unwrap(),
        ]
    });

    let without_scripts = scripts.replace_all(html, "");
    let without_handlers = handlers.replace_all(&without_scripts, "");
    js_urls.replace_all(&without_handlers, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_is_rejected() {
        for code in ["eval('1+1')", "const y = eval (x);", "  EVAL(code)"] {
            let report = validate_code(code, Language::Javascript);
            assert!(!report.safe, "{} should be unsafe", code);
            assert!(report.errors.iter().any(|e| e.contains("eval()")));
        }
    }

    #[test]
    fn test_benign_code_is_safe() {
        let report = validate_code("const x = 1; console.log(x);", Language::Javascript);
        assert!(report.safe);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_input_is_always_safe() {
        for code in ["", "   \n\t"] {
            let report = validate_code(code, Language::Html);
            assert_eq!(report, ValidationReport::clean());
        }
    }

    #[test]
    fn test_every_disallowed_family_is_reported() {
        let samples = [
            ("<script>alert(1)</script>", Language::Html, "<script>"),
            ("<a href=\"javascript:void(0)\">x</a>", Language::Html, "javascript:"),
            ("<img src=x onerror=\"steal()\">", Language::Html, "event handler"),
            ("document.write('hi')", Language::Javascript, "document.write"),
            ("new Function('return 1')", Language::Javascript, "Function constructor"),
            ("fetch('/api')", Language::Javascript, "fetch()"),
            ("new XMLHttpRequest()", Language::Javascript, "XMLHttpRequest"),
            ("$.ajax({})", Language::Javascript, "$.ajax()"),
            ("localStorage.setItem('k', 1)", Language::Javascript, "localStorage"),
            ("sessionStorage.clear()", Language::Javascript, "sessionStorage"),
            ("indexedDB.open('db')", Language::Javascript, "indexedDB"),
            ("window.opener.location", Language::Javascript, "window.opener"),
            ("window.parent.postMessage(1)", Language::Javascript, "window.parent"),
            ("window.top.location", Language::Javascript, "window.top"),
            ("setTimeout('alert(1)', 10)", Language::Javascript, "string argument"),
        ];
        for (code, language, needle) in samples {
            let report = validate_code(code, language);
            assert!(!report.safe, "{} should be unsafe", code);
            assert!(
                report.errors.iter().any(|e| e.contains(needle)),
                "{:?} does not mention {}",
                report.errors,
                needle
            );
        }
    }

    #[test]
    fn test_string_timer_only_checked_for_scripts() {
        let report = validate_code("setTimeout('x', 1)", Language::Html);
        assert!(report.safe);
    }

    #[test]
    fn test_risky_loops_warn_without_blocking() {
        let report = validate_code("let i = 0; while (true) { i++; }", Language::Javascript);
        assert!(report.safe);
        assert!(report.warnings.iter().any(|w| w.contains("while (true)")));
        assert!(report.warnings.iter().any(|w| w.contains("without break or return")));

        let report = validate_code("while (true) { if (done) break; }", Language::Javascript);
        assert!(!report.warnings.iter().any(|w| w.contains("without break")));

        let report = validate_code("for (;;) { tick(); }", Language::Javascript);
        assert!(report.warnings.iter().any(|w| w.contains("for (;;)")));
        assert!(report.warnings.iter().any(|w| w.contains("empty increment")));

        let report = validate_code("for (let i = 0; i < 3; ) { i += 1; }", Language::Javascript);
        assert!(report.warnings.iter().any(|w| w.contains("empty increment")));
    }

    #[test]
    fn test_loop_diagnostics() {
        let report = validate_code("while (1) { step(); }", Language::Javascript);
        assert!(report.warnings.iter().any(|w| w.contains("constant truthy")));

        let report = validate_code("function spin(n) { spin(n + 1); }", Language::Javascript);
        assert!(report.warnings.iter().any(|w| w.contains("function spin")));

        let report = validate_code(
            "function fact(n) { if (n < 2) { return 1; } return n * fact(n - 1); }",
            Language::Javascript,
        );
        assert!(!report.warnings.iter().any(|w| w.contains("recursion")));

        let report = validate_code("const t = setInterval(tick, 100);", Language::Javascript);
        assert!(report.warnings.iter().any(|w| w.contains("clearInterval")));
    }

    #[test]
    fn test_oversized_input_warns() {
        let code = "x".repeat(MAX_CODE_LENGTH + 1);
        let report = validate_code(&code, Language::Javascript);
        assert!(report.safe);
        assert!(report.warnings.iter().any(|w| w.contains("very long")));

        let report = SafetyValidator::new()
            .with_max_length(4)
            .validate("p { }", Language::Css);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_conservative_false_positive_is_kept() {
        let report = validate_code("const label = 'call fetch(url) later';", Language::Javascript);
        assert!(!report.safe);
    }

    #[test]
    fn test_sanitize_html() {
        let dirty = r#"<p onclick="go()">Hi</p><script>steal()</script><a href="javascript:x">l</a>"#;
        let clean = sanitize_html(dirty);
        assert!(!clean.contains("<script>"));
        assert!(!clean.contains("onclick"));
        assert!(!clean.to_lowercase().contains("javascript:"));
        assert!(clean.contains("<p >Hi</p>"));
    }
}
