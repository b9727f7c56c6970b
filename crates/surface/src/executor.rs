use std::time::Duration;

use omniagent_core::{Action, ExecOutcome};
use tracing::{debug, warn};

use crate::page::{PageDriver, PageError};
use crate::scanner::ElementRegistry;

/// Result of an execution attempt, as reported to the orchestration loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecStatus {
    Completed(ExecOutcome),
    /// The page context was torn down mid-action. Navigation disconnects
    /// usually mean the action worked, so the loop treats this as success.
    Navigated,
}

/// Executes one structured action against the page through the driver.
pub struct Executor {
    /// Fixed settle delay after any mutating action: a coarse stand-in for a
    /// real "page stable" detector, and a known source of latency.
    settle: Duration,
    /// Pause between text insertion and the commit-key sequence.
    commit_pause: Duration,
}

const SCROLL_INCREMENT: i32 = 500;

impl Executor {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            commit_pause: Duration::from_millis(100),
        }
    }

    pub async fn execute(
        &self,
        action: &Action,
        registry: &ElementRegistry,
        driver: &mut dyn PageDriver,
    ) -> ExecStatus {
        debug!(action = action.kind().as_str(), "executing action");

        match action {
            Action::Done => {
                driver.clear_marks();
                ExecStatus::Completed(ExecOutcome::with_data("Task completed.".to_string()))
            }
            Action::Click { target } => {
                let handle = match registry.resolve(*target) {
                    Some(h) => h,
                    None => return not_found(*target),
                };
                driver.flash(handle);
                if driver.click(handle).is_err() {
                    return ExecStatus::Navigated;
                }
                driver.focus(handle);
                self.settle().await;
                ExecStatus::Completed(ExecOutcome::ok())
            }
            Action::Type { target, text } => {
                let handle = match registry.resolve(*target) {
                    Some(h) => h,
                    None => return not_found(*target),
                };
                self.type_into(handle, text, driver).await
            }
            Action::Scroll => {
                driver.scroll_by(SCROLL_INCREMENT);
                self.settle().await;
                ExecStatus::Completed(ExecOutcome::ok())
            }
            Action::Navigate { url } => {
                if driver.navigate(url).is_err() {
                    return ExecStatus::Navigated;
                }
                self.settle().await;
                ExecStatus::Completed(ExecOutcome::ok())
            }
            Action::Extract => {
                ExecStatus::Completed(ExecOutcome::with_data(driver.visible_text()))
            }
            _ => ExecStatus::Completed(ExecOutcome::fail("unknown action type")),
        }
    }

    /// The layered text-injection chain. No single mechanism reliably
    /// triggers state updates across the pages the agent encounters; the
    /// steps run in this exact order because later ones are fallbacks for
    /// when earlier ones silently no-op.
    async fn type_into(
        &self,
        handle: crate::page::NodeHandle,
        text: &str,
        driver: &mut dyn PageDriver,
    ) -> ExecStatus {
        driver.flash(handle);
        driver.focus(handle);

        // 1. Pre-input notification.
        driver.dispatch_before_input(handle);

        // 2. Editing-command insertion; the only path that cooperates with
        //    frameworks intercepting direct value assignment.
        let changed = driver.insert_text_command(handle, text);

        // 3. Direct assignment fallback.
        if !changed {
            if driver.is_editable_region(handle) {
                driver.set_text_content(handle, text);
            } else {
                driver.set_value_raw(handle, text);
            }
        }

        // 4-6. Notification sweep for the listener styles in the wild.
        driver.dispatch_input(handle, text);
        driver.dispatch_text_input_legacy(handle, text);
        driver.dispatch_change(handle);

        tokio::time::sleep(self.commit_pause).await;

        // Submit-by-Enter, then an explicit form submission where one exists.
        driver.press_commit_key(handle);
        if let Some(form) = driver.form_of(handle) {
            match driver.submit_form(form) {
                Ok(()) => {}
                // A form detached by the submit-triggered navigation must
                // not abort the action.
                Err(PageError::Detached) => {
                    warn!("form no longer attached during submit, continuing");
                }
                Err(PageError::Gone) => return ExecStatus::Navigated,
            }
        }

        self.settle().await;
        ExecStatus::Completed(ExecOutcome::ok())
    }

    async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }
}

fn not_found(target: u32) -> ExecStatus {
    ExecStatus::Completed(ExecOutcome::fail(format!(
        "Element [ID: {}] not found.",
        target
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureNode, FixturePage};
    use crate::scanner::Scanner;

    fn executor() -> Executor {
        Executor::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn stale_id_is_a_terminal_error_not_a_retry() {
        let mut page = FixturePage::new("https://example.com");
        page.push(FixtureNode::button("Go"));
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        let status = executor()
            .execute(&Action::Click { target: 99 }, scanner.registry(), &mut page)
            .await;
        match status {
            ExecStatus::Completed(outcome) => {
                assert!(!outcome.success);
                assert_eq!(outcome.error.as_deref(), Some("Element [ID: 99] not found."));
            }
            other => panic!("unexpected status: {:?}", other),
        }
        // No side effect reached the page.
        assert!(!page.events().iter().any(|e| e.starts_with("click")));
    }

    #[tokio::test]
    async fn click_flashes_clicks_and_focuses() {
        let mut page = FixturePage::new("https://example.com");
        page.push(FixtureNode::button("Go"));
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        let status = executor()
            .execute(&Action::Click { target: 1 }, scanner.registry(), &mut page)
            .await;
        assert_eq!(status, ExecStatus::Completed(ExecOutcome::ok()));
        let events = page.events();
        let click_pos = events.iter().position(|e| e == "click:1").unwrap();
        let focus_pos = events.iter().position(|e| e == "focus:1").unwrap();
        assert!(events.iter().any(|e| e == "flash:1"));
        assert!(click_pos < focus_pos);
    }

    #[tokio::test]
    async fn type_chain_runs_in_order_and_command_path_wins() {
        let mut page = FixturePage::new("https://example.com");
        // Direct value writes are intercepted by the page's framework; the
        // editing-command path still has to land the text.
        let mut field = FixtureNode::input("Search", "q");
        field.raw_value_writes_ignored = true;
        page.push(field);
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        let status = executor()
            .execute(
                &Action::Type {
                    target: 1,
                    text: "rust books".to_string(),
                },
                scanner.registry(),
                &mut page,
            )
            .await;
        assert_eq!(status, ExecStatus::Completed(ExecOutcome::ok()));
        assert_eq!(page.visible_value_of(0).as_deref(), Some("rust books"));

        let events = page.events();
        let order = [
            "beforeinput:1",
            "insertText:1:rust books",
            "input:1:rust books",
            "textInput:1",
            "change:1",
            "enter:1",
        ];
        let mut last = 0;
        for needle in order {
            let pos = events
                .iter()
                .position(|e| e == needle)
                .unwrap_or_else(|| panic!("missing event {}", needle));
            assert!(pos >= last, "event {} out of order", needle);
            last = pos;
        }
    }

    #[tokio::test]
    async fn type_falls_back_to_raw_write_when_command_is_ignored() {
        let mut page = FixturePage::new("https://example.com");
        let mut field = FixtureNode::input("Search", "q");
        field.command_insert_unsupported = true;
        page.push(field);
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        executor()
            .execute(
                &Action::Type {
                    target: 1,
                    text: "fallback".to_string(),
                },
                scanner.registry(),
                &mut page,
            )
            .await;
        assert_eq!(page.visible_value_of(0).as_deref(), Some("fallback"));
        assert!(page.events().iter().any(|e| e == "setValueRaw:1"));
    }

    #[tokio::test]
    async fn detached_form_does_not_abort_the_type_action() {
        let mut page = FixturePage::new("https://example.com");
        let mut field = FixtureNode::input("Search", "q");
        field.form = Some(1);
        field.form_detached = true;
        page.push(field);
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        let status = executor()
            .execute(
                &Action::Type {
                    target: 1,
                    text: "ok".to_string(),
                },
                scanner.registry(),
                &mut page,
            )
            .await;
        assert_eq!(status, ExecStatus::Completed(ExecOutcome::ok()));
    }

    #[tokio::test]
    async fn click_that_unloads_the_page_reports_navigated() {
        let mut page = FixturePage::new("https://example.com");
        let mut link = FixtureNode::link("Next page", "https://example.com/2");
        link.click_navigates = Some("https://example.com/2".to_string());
        page.push(link);
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        let status = executor()
            .execute(&Action::Click { target: 1 }, scanner.registry(), &mut page)
            .await;
        assert_eq!(status, ExecStatus::Navigated);
    }

    #[tokio::test]
    async fn extract_returns_visible_text() {
        let mut page = FixturePage::new("https://example.com");
        page.push(FixtureNode::heading("h1", "Prices"));
        page.push(FixtureNode::span("$ 10"));
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);

        let status = executor()
            .execute(&Action::Extract, scanner.registry(), &mut page)
            .await;
        match status {
            ExecStatus::Completed(outcome) => {
                assert!(outcome.success);
                let data = outcome.data.unwrap();
                assert!(data.contains("Prices"));
                assert!(data.contains("$ 10"));
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_kind_errors_without_side_effect() {
        let mut page = FixturePage::new("https://example.com");
        page.push(FixtureNode::button("Go"));
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);
        let before = page.events().len();

        let status = executor()
            .execute(&Action::Wait, scanner.registry(), &mut page)
            .await;
        match status {
            ExecStatus::Completed(outcome) => {
                assert_eq!(outcome.error.as_deref(), Some("unknown action type"));
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(page.events().len(), before);
    }

    #[tokio::test]
    async fn done_clears_markers() {
        let mut page = FixturePage::new("https://example.com");
        page.push(FixtureNode::button("Go"));
        let mut scanner = Scanner::new();
        scanner.scan(&mut page);
        assert!(!page.marks().is_empty());

        executor()
            .execute(&Action::Done, scanner.registry(), &mut page)
            .await;
        assert!(page.marks().is_empty());
    }
}
