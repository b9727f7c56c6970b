use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use omniagent_core::Action;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::executor::{ExecStatus, Executor};
use crate::page::PageDriver;
use crate::scanner::Scanner;

/// Requests serviced by the surface execution context. Every request carries
/// its own reply channel; there is no shared state across the boundary.
pub enum SurfaceRequest {
    GetContext { reply: oneshot::Sender<String> },
    Execute { action: Action, reply: oneshot::Sender<ExecStatus> },
    ClearOverlays { reply: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceError {
    /// The collaborator is not present or not responding.
    Unreachable,
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::Unreachable => write!(f, "surface collaborator unreachable"),
        }
    }
}

impl std::error::Error for SurfaceError {}

/// Client handle to a surface actor. Cloneable; all methods are plain
/// request/response with a per-request timeout.
#[derive(Clone)]
pub struct SurfaceHandle {
    tx: mpsc::Sender<SurfaceRequest>,
    timeout: Duration,
}

impl SurfaceHandle {
    pub async fn context(&self) -> Result<String, SurfaceError> {
        self.request(|reply| SurfaceRequest::GetContext { reply }).await
    }

    pub async fn execute(&self, action: Action) -> Result<ExecStatus, SurfaceError> {
        self.request(|reply| SurfaceRequest::Execute { action, reply })
            .await
    }

    pub async fn clear_overlays(&self) -> Result<(), SurfaceError> {
        self.request(|reply| SurfaceRequest::ClearOverlays { reply })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SurfaceRequest,
    ) -> Result<T, SurfaceError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| SurfaceError::Unreachable)?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            // Dropped reply or timeout both mean the context is unusable.
            _ => Err(SurfaceError::Unreachable),
        }
    }
}

/// Spawn the surface actor owning a page driver. The actor exits when the
/// page context is torn down by a navigation, so a fresh one must be
/// injected afterwards — exactly the lifecycle of an in-page script.
pub fn spawn_surface(
    mut driver: Box<dyn PageDriver>,
    settle: Duration,
    timeout: Duration,
) -> SurfaceHandle {
    let (tx, mut rx) = mpsc::channel::<SurfaceRequest>(16);

    tokio::spawn(async move {
        let mut scanner = Scanner::new();
        let executor = Executor::new(settle);

        while let Some(request) = rx.recv().await {
            match request {
                SurfaceRequest::GetContext { reply } => {
                    let _ = reply.send(scanner.scan(driver.as_mut()));
                }
                SurfaceRequest::Execute { action, reply } => {
                    let status = executor
                        .execute(&action, scanner.registry(), driver.as_mut())
                        .await;
                    let navigated = matches!(status, ExecStatus::Navigated);
                    let _ = reply.send(status);
                    if navigated {
                        debug!("page navigated away, surface context ends");
                        break;
                    }
                }
                SurfaceRequest::ClearOverlays { reply } => {
                    scanner.clear(driver.as_mut());
                    let _ = reply.send(());
                }
            }
        }
    });

    SurfaceHandle { tx, timeout }
}

/// Installs (or re-installs) a surface collaborator into the active page.
#[async_trait]
pub trait SurfaceInjector: Send + Sync {
    async fn inject(&self) -> Result<SurfaceHandle, SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureInjector, FixtureNode, FixturePage};
    use omniagent_core::ExecOutcome;

    fn handle_for(page: FixturePage) -> SurfaceHandle {
        spawn_surface(Box::new(page), Duration::ZERO, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn scan_and_execute_roundtrip() {
        let page = FixturePage::new("https://example.com");
        page.push(FixtureNode::button("Go"));
        let handle = handle_for(page.clone());

        let context = handle.context().await.unwrap();
        assert!(context.contains("[ID: 1]"));

        let status = handle.execute(Action::Click { target: 1 }).await.unwrap();
        assert_eq!(status, ExecStatus::Completed(ExecOutcome::ok()));
        assert!(page.events().iter().any(|e| e == "click:1"));
    }

    #[tokio::test]
    async fn execute_before_scan_resolves_nothing() {
        let page = FixturePage::new("https://example.com");
        page.push(FixtureNode::button("Go"));
        let handle = handle_for(page);

        let status = handle.execute(Action::Click { target: 1 }).await.unwrap();
        match status {
            ExecStatus::Completed(outcome) => assert!(!outcome.success),
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn actor_ends_after_navigation_and_reinjection_revives() {
        let page = FixturePage::new("https://example.com");
        let mut link = FixtureNode::link("Next", "https://example.com/2");
        link.click_navigates = Some("https://example.com/2".to_string());
        page.push(link);

        let injector = FixtureInjector::new(page, Duration::ZERO, Duration::from_secs(1));
        let handle = injector.inject().await.unwrap();
        handle.context().await.unwrap();

        let status = handle.execute(Action::Click { target: 1 }).await.unwrap();
        assert_eq!(status, ExecStatus::Navigated);

        // The old context is gone; requests fail until re-injection.
        assert!(handle.context().await.is_err());
        let fresh = injector.inject().await.unwrap();
        assert!(fresh.context().await.unwrap().contains("[ID: 1]"));
    }
}
