/// Highest-fidelity strategy: open the result page in a headless browser, fill in the
/// student's details, submit, and capture the results table.
///
/// Form fields are found by hints in their placeholder, name and id, since the portal
/// pages differ per exam. Department or branch selectors are left as the portal
/// defaults them; the listing option label is not a value they accept. A submitted
/// form without a results table means the portal did not recognise the details; that
/// is reported as "not found" and ends the chain.
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::webdriver::{ElementId, WebDriverClient, WebDriverSession};
use super::{not_found_message, summary_message, RenderError, RenderStrategy};
use crate::model::{RenderResult, RenderTarget, Screenshot};
use crate::parser::extract_labeled_fields;

const ROLL_HINTS: &[&str] = &["roll", "hall", "ht", "hallticket"];
const DOB_HINTS: &[&str] = &["dob", "date", "birth"];
const DEPARTMENT_HINTS: &[&str] = &["dept", "branch"];
const SUBMIT_HINTS: &[&str] = &["submit", "result", "view", "go"];
const SKIPPED_INPUT_TYPES: &[&str] =
    &["hidden", "submit", "button", "checkbox", "radio", "image"];

const STRATEGY_NAME: &str = "headless-browser";

pub struct BrowserStrategy {
    driver: Option<WebDriverClient>,
    table_selector: String,
    settle: Duration,
}

#[derive(Default)]
struct FormFields {
    roll: Option<ElementId>,
    dob: Option<ElementId>,
}

impl BrowserStrategy {
    pub fn new(driver: Option<WebDriverClient>, table_selector: &str, settle: Duration) -> Self {
        Self {
            driver,
            table_selector: table_selector.to_string(),
            settle,
        }
    }

    async fn capture(
        &self,
        session: &WebDriverSession,
        target: &RenderTarget,
    ) -> Result<RenderResult, RenderError> {
        session.goto(&target.link).await?;
        self.submit_form(session, target).await?;
        tokio::time::sleep(self.settle).await;

        let tables = session.find_all(&self.table_selector).await?;
        let Some(table) = tables.into_iter().next() else {
            debug!(roll = %target.roll_number, "no results table after submit");
            return Ok(RenderResult::Text(not_found_message(target)));
        };

        match session.element_screenshot(&table).await {
            Ok(png) => Ok(RenderResult::Screenshot(Screenshot {
                png,
                source: STRATEGY_NAME.to_string(),
            })),
            Err(e) => {
                warn!(error = %e, "results table capture failed, reading fields instead");
                let text = session.text(&table).await.unwrap_or_default();
                let fields = extract_labeled_fields(&text);
                if !fields.is_empty() {
                    return Ok(RenderResult::Text(summary_message(target, &fields)));
                }
                let png = session.screenshot().await?;
                Ok(RenderResult::Screenshot(Screenshot {
                    png,
                    source: format!("{STRATEGY_NAME} (full page)"),
                }))
            }
        }
    }

    async fn submit_form(
        &self,
        session: &WebDriverSession,
        target: &RenderTarget,
    ) -> Result<(), RenderError> {
        let fields = locate_fields(session).await?;
        let roll = fields
            .roll
            .ok_or_else(|| RenderError::MissingElement("roll number input".to_string()))?;
        let dob = fields
            .dob
            .ok_or_else(|| RenderError::MissingElement("date of birth input".to_string()))?;

        session.send_keys(&roll, &target.roll_number).await?;
        session.send_keys(&dob, &target.date_of_birth).await?;

        let mut submit = None;
        for button in session.find_all("button, input[type=submit]").await? {
            let text = session.text(&button).await.unwrap_or_default();
            let value = session.attribute(&button, "value").await?.unwrap_or_default();
            if hint_matches(&format!("{text} {value}"), SUBMIT_HINTS) {
                submit = Some(button);
                break;
            }
        }
        let submit =
            submit.ok_or_else(|| RenderError::MissingElement("submit button".to_string()))?;
        session.click(&submit).await
    }
}

async fn locate_fields(session: &WebDriverSession) -> Result<FormFields, RenderError> {
    let mut fields = FormFields::default();
    for element in session.find_all("input, select").await? {
        let input_type = session.attribute(&element, "type").await?.unwrap_or_default();
        if SKIPPED_INPUT_TYPES.contains(&input_type.to_ascii_lowercase().as_str()) {
            continue;
        }
        let mut hint = String::new();
        for attr in ["placeholder", "name", "id"] {
            if let Some(v) = session.attribute(&element, attr).await? {
                hint.push_str(&v);
                hint.push(' ');
            }
        }

        if hint_matches(&hint, DEPARTMENT_HINTS) {
            debug!(hint = hint.trim(), "leaving department field untouched");
        } else if fields.roll.is_none() && hint_matches(&hint, ROLL_HINTS) {
            fields.roll = Some(element);
        } else if fields.dob.is_none() && hint_matches(&hint, DOB_HINTS) {
            fields.dob = Some(element);
        }
    }
    Ok(fields)
}

fn hint_matches(hint: &str, keys: &[&str]) -> bool {
    let hint = hint.to_lowercase();
    keys.iter().any(|k| hint.contains(k))
}

#[async_trait]
impl RenderStrategy for BrowserStrategy {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    async fn render(&self, target: &RenderTarget) -> Result<RenderResult, RenderError> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| RenderError::Unavailable("browser automation".to_string()))?;
        // Dropping the session mid-capture (chain deadline) closes it in the background.
        let session = driver.new_session().await?;
        let outcome = self.capture(&session, target).await;
        session.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::render::tests::target;
    use crate::render::webdriver::tests::{elements, FakeDriver, Reply};
    use crate::render::RenderChain;

    const TABLE_PNG: &str = "iVBORw0KGgo=";
    const PAGE_PNG: &str = "UEFHRQ==";

    /// A portal form with roll, date of birth and branch fields and a results table.
    fn portal_form(method: &str, path: &str, body: &Value) -> Reply {
        let Some(command) = path.strip_prefix("/session/s1") else {
            return match (method, path) {
                ("POST", "/session") => Reply::Value(json!({ "sessionId": "s1" })),
                _ => Reply::Error(404, json!({ "error": "unknown command", "message": path })),
            };
        };
        match (method, command) {
            ("DELETE", "") | ("POST", "/url") => Reply::Value(Value::Null),
            ("POST", "/elements") => match body["value"].as_str().unwrap_or_default() {
                "input, select" => elements(&["e1", "e2", "e3"]),
                "button, input[type=submit]" => elements(&["b1"]),
                "table" => elements(&["t1"]),
                _ => elements(&[]),
            },
            ("GET", "/element/e1/attribute/placeholder") => Reply::Value(json!("Roll No")),
            ("GET", "/element/e2/attribute/name") => Reply::Value(json!("dob")),
            ("GET", "/element/e3/attribute/name") => Reply::Value(json!("ddlBranch")),
            ("GET", "/element/b1/text") => Reply::Value(json!("Submit")),
            ("GET", "/element/t1/screenshot") => Reply::Value(json!(TABLE_PNG)),
            ("GET", "/element/t1/text") => Reply::Value(json!("Name: A STUDENT\nSGPA: 8.42")),
            ("GET", "/screenshot") => Reply::Value(json!(PAGE_PNG)),
            ("GET", c) if c.ends_with("/attribute/type") => Reply::Value(json!("text")),
            ("GET", c) if c.contains("/attribute/") => Reply::Value(Value::Null),
            ("POST", c) if c.ends_with("/value") || c.ends_with("/click") => {
                Reply::Value(Value::Null)
            }
            _ => Reply::Error(404, json!({ "error": "unknown command", "message": path })),
        }
    }

    fn without_table(method: &str, path: &str, body: &Value) -> Reply {
        if body["value"] == "table" {
            return elements(&[]);
        }
        portal_form(method, path, body)
    }

    fn broken_table_capture(method: &str, path: &str, body: &Value) -> Reply {
        if path == "/session/s1/element/t1/screenshot" {
            return Reply::Error(
                404,
                json!({ "error": "no such element", "message": "stale element reference" }),
            );
        }
        portal_form(method, path, body)
    }

    fn broken_table_without_fields(method: &str, path: &str, body: &Value) -> Reply {
        if path == "/session/s1/element/t1/text" {
            return Reply::Value(json!("Marks Memo"));
        }
        broken_table_capture(method, path, body)
    }

    fn hanging_navigation(method: &str, path: &str, body: &Value) -> Reply {
        if path == "/session/s1/url" {
            return Reply::Hang;
        }
        portal_form(method, path, body)
    }

    fn strategy(driver: &FakeDriver) -> BrowserStrategy {
        BrowserStrategy::new(Some(driver.client()), "table", Duration::ZERO)
    }

    fn deleted(driver: &FakeDriver) -> bool {
        driver.requests().iter().any(|r| r == "DELETE /session/s1")
    }

    #[test]
    fn hints_are_case_insensitive_substrings() {
        assert!(hint_matches("Enter Hall Ticket Number htno ", ROLL_HINTS));
        assert!(hint_matches("txtDOB ", DOB_HINTS));
        assert!(hint_matches("Date of Birth (dd-mm-yyyy) ", DOB_HINTS));
        assert!(hint_matches("ddlBranch ", DEPARTMENT_HINTS));
        assert!(!hint_matches("captcha ", ROLL_HINTS));
    }

    #[test]
    fn submit_hints_cover_common_labels() {
        for label in ["Submit", "Get Result", "VIEW", "Go"] {
            assert!(hint_matches(label, SUBMIT_HINTS), "{label}");
        }
        assert!(!hint_matches("Reset", SUBMIT_HINTS));
    }

    #[tokio::test]
    async fn without_webdriver_the_strategy_is_unavailable() {
        let strategy = BrowserStrategy::new(None, "table", Duration::ZERO);
        assert!(matches!(
            strategy.render(&target()).await,
            Err(RenderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn filled_form_captures_the_results_table() {
        let driver = FakeDriver::start(portal_form).await;

        let result = strategy(&driver).render(&target()).await.unwrap();

        assert_eq!(
            result,
            RenderResult::Screenshot(Screenshot {
                png: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
                source: STRATEGY_NAME.to_string(),
            })
        );
        let requests = driver.requests();
        assert!(requests.iter().any(|r| r == "POST /session/s1/element/e1/value"));
        assert!(requests.iter().any(|r| r == "POST /session/s1/element/e2/value"));
        assert!(requests.iter().any(|r| r == "POST /session/s1/element/b1/click"));
        assert!(!requests.iter().any(|r| r == "POST /session/s1/element/e3/value"));
        assert!(deleted(&driver));
    }

    #[tokio::test]
    async fn missing_table_is_reported_as_not_found() {
        let driver = FakeDriver::start(without_table).await;

        let result = strategy(&driver).render(&target()).await.unwrap();

        assert_eq!(result, RenderResult::Text(not_found_message(&target())));
        assert!(deleted(&driver));
    }

    #[tokio::test]
    async fn failed_table_capture_falls_back_to_labeled_fields() {
        let driver = FakeDriver::start(broken_table_capture).await;

        let RenderResult::Text(text) = strategy(&driver).render(&target()).await.unwrap() else {
            panic!("expected a text summary");
        };

        assert!(text.starts_with("Result for 21X51A0501"));
        assert!(text.contains("Name: A STUDENT\nSGPA: 8.42\n"));
        assert!(deleted(&driver));
    }

    #[tokio::test]
    async fn failed_table_capture_without_fields_takes_full_page() {
        let driver = FakeDriver::start(broken_table_without_fields).await;

        let result = strategy(&driver).render(&target()).await.unwrap();

        assert_eq!(
            result,
            RenderResult::Screenshot(Screenshot {
                png: b"PAGE".to_vec(),
                source: format!("{STRATEGY_NAME} (full page)"),
            })
        );
        assert!(deleted(&driver));
    }

    #[tokio::test]
    async fn session_is_deleted_when_the_chain_deadline_cancels_the_render() {
        let driver = FakeDriver::start(hanging_navigation).await;
        let chain = RenderChain::new(vec![Box::new(strategy(&driver))], Duration::from_millis(300));

        let RenderResult::Text(text) = chain.render(&target()).await else {
            panic!("expected the link fallback");
        };
        assert!(text.contains("Results link:"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(deleted(&driver));
    }
}
