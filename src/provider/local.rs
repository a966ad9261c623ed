//! File-backed provider
//!
//! `LocalProvider` reads a subscription file once at construction and then
//! reloads it whenever the file changes on disk.
//!
//! # Reload state machine
//!
//! ```text
//!            try_begin() ok
//!   Idle ───────────────────▶ Reloading
//!    ▲                            │
//!    └──── ticket dropped ────────┘
//! ```
//!
//! A change event that arrives while a reload is in flight is dropped, not
//! queued. Once the ticket is released the bound selector groups are
//! notified, whether the reload succeeded or not.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{Provider, ProviderAdapter, ProviderContext, SubscriptionParser, PROVIDER_TYPE_LOCAL};
use crate::config::LocalProviderOptions;
use crate::error::ProviderError;
use crate::outbound::Outbound;
use crate::watch::FileWatcher;

/// Single in-flight reload flag
#[derive(Debug, Default)]
pub struct ReloadGuard {
    reloading: AtomicBool,
}

impl ReloadGuard {
    /// Create an idle guard
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reloading: AtomicBool::new(false),
        }
    }

    /// Move to Reloading, or `None` if a reload is already in flight
    #[must_use]
    pub fn try_begin(&self) -> Option<ReloadTicket<'_>> {
        if self.reloading.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(ReloadTicket { guard: self })
    }

    /// Check if a reload is in flight
    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::Acquire)
    }
}

/// Proof of an in-flight reload; returns the guard to Idle on drop
#[derive(Debug)]
pub struct ReloadTicket<'a> {
    guard: &'a ReloadGuard,
}

impl Drop for ReloadTicket<'_> {
    fn drop(&mut self) {
        self.guard.reloading.store(false, Ordering::Release);
    }
}

/// What a reload attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Another reload was in flight; this attempt was dropped
    Coalesced,
    /// The file was reloaded
    Reloaded,
    /// The reload failed; the previous outbounds stay in effect
    Failed,
}

/// Provider backed by a local subscription file
pub struct LocalProvider {
    adapter: ProviderAdapter,
    path: PathBuf,
    parser: Arc<dyn SubscriptionParser>,
    updated_at: Mutex<Option<SystemTime>>,
    guard: ReloadGuard,
    watcher: FileWatcher,
}

impl LocalProvider {
    /// Create a provider and load its file
    ///
    /// The path resolves against the context's base directory. The file is
    /// loaded synchronously; the watcher only starts with
    /// [`Provider::start`].
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::MissingTag` / `MissingPath` for empty
    /// arguments, or the read/parse error of the initial load.
    pub fn new(
        ctx: &ProviderContext,
        tag: &str,
        options: LocalProviderOptions,
    ) -> Result<Arc<Self>, ProviderError> {
        if tag.is_empty() {
            return Err(ProviderError::MissingTag);
        }
        if options.path.is_empty() {
            return Err(ProviderError::MissingPath);
        }

        let path = ctx.resolve_path(&options.path);
        let adapter = ProviderAdapter::new(
            tag,
            PROVIDER_TYPE_LOCAL,
            Arc::clone(&ctx.outbounds),
            ctx.probe.clone(),
        );
        let parser = Arc::clone(&ctx.parser);
        let updated_at = Mutex::new(None);

        load_file(&path, parser.as_ref(), &adapter, &updated_at)?;

        let provider = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let watcher = FileWatcher::new(
                vec![path.clone()],
                Arc::new(move |_: &Path| {
                    if let Some(provider) = weak.upgrade() {
                        provider.reload();
                    }
                }),
            );
            Self {
                adapter,
                path,
                parser,
                updated_at,
                guard: ReloadGuard::new(),
                watcher,
            }
        });

        info!(
            "Created local provider {} from {:?} ({} outbounds)",
            tag,
            provider.path,
            provider.adapter.outbounds().len()
        );
        Ok(provider)
    }

    /// Resolved absolute path of the subscription file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file and notify bound groups
    ///
    /// Runs at most one reload at a time; a call made while another is in
    /// flight returns [`ReloadOutcome::Coalesced`] without touching anything.
    pub fn reload(&self) -> ReloadOutcome {
        let outcome = match self.guard.try_begin() {
            None => {
                debug!("Provider {} reload already in flight, skipping", self.tag());
                return ReloadOutcome::Coalesced;
            }
            Some(_ticket) => {
                match load_file(&self.path, self.parser.as_ref(), &self.adapter, &self.updated_at) {
                    Ok(()) => ReloadOutcome::Reloaded,
                    Err(e) => {
                        error!("Failed to reload provider {}: {}", self.tag(), e);
                        ReloadOutcome::Failed
                    }
                }
            }
        };
        self.adapter.update_groups();
        outcome
    }
}

fn load_file(
    path: &Path,
    parser: &dyn SubscriptionParser,
    adapter: &ProviderAdapter,
    updated_at: &Mutex<Option<SystemTime>>,
) -> Result<(), ProviderError> {
    if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
        *updated_at.lock() = Some(modified);
    }
    let content = fs::read_to_string(path).map_err(|e| ProviderError::read(path, e))?;
    let configs = parser.parse(&content)?;
    adapter.update_outbounds(configs);
    Ok(())
}

#[async_trait]
impl Provider for LocalProvider {
    fn provider_type(&self) -> &str {
        self.adapter.provider_type()
    }

    fn tag(&self) -> &str {
        self.adapter.tag()
    }

    fn outbounds(&self) -> Vec<Arc<dyn Outbound>> {
        self.adapter.outbounds()
    }

    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.adapter.outbound(tag)
    }

    fn updated_at(&self) -> Option<SystemTime> {
        *self.updated_at.lock()
    }

    fn is_updating(&self) -> bool {
        self.guard.is_reloading()
    }

    async fn health_check(&self) -> Result<HashMap<String, u16>, ProviderError> {
        self.adapter.health_check().await
    }

    fn start(&self) -> Result<(), ProviderError> {
        if let Err(e) = self.watcher.start() {
            error!("Failed to watch provider file {:?}: {}", self.path, e);
        }
        Ok(())
    }

    fn close(&self) {
        self.watcher.close();
        self.adapter.close();
    }

    fn update_groups(&self) {
        self.adapter.update_groups();
    }
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("tag", &self.tag())
            .field("path", &self.path)
            .field("updating", &self.is_updating())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundManager;
    use std::time::Duration;
    use tempfile::TempDir;

    const TWO: &str = r#"[{"tag": "hk-01", "type": "direct"}, {"tag": "jp-01", "type": "direct"}]"#;

    fn context(dir: &TempDir) -> ProviderContext {
        ProviderContext::new(Arc::new(OutboundManager::new())).with_base_dir(dir.path())
    }

    fn options(path: &str) -> LocalProviderOptions {
        LocalProviderOptions {
            path: path.to_string(),
        }
    }

    #[test]
    fn test_reload_guard() {
        let guard = ReloadGuard::new();
        let ticket = guard.try_begin().unwrap();
        assert!(guard.is_reloading());
        assert!(guard.try_begin().is_none());
        drop(ticket);
        assert!(!guard.is_reloading());
        assert!(guard.try_begin().is_some());
    }

    #[test]
    fn test_new_loads_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("sub.json"), TWO).unwrap();

        let provider = LocalProvider::new(&context(&dir), "sub", options("sub.json")).unwrap();
        assert_eq!(provider.tag(), "sub");
        assert_eq!(provider.provider_type(), "local");
        assert_eq!(provider.outbounds().len(), 2);
        assert!(provider.outbound("jp-01").is_some());
        assert!(provider.updated_at().is_some());
        assert!(provider.path().is_absolute());
        assert!(!provider.is_updating());
    }

    #[test]
    fn test_new_rejects_missing_arguments() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LocalProvider::new(&context(&dir), "", options("sub.json")),
            Err(ProviderError::MissingTag)
        ));
        assert!(matches!(
            LocalProvider::new(&context(&dir), "sub", options("")),
            Err(ProviderError::MissingPath)
        ));
    }

    #[test]
    fn test_new_fails_on_unreadable_or_bad_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LocalProvider::new(&context(&dir), "sub", options("missing.json")),
            Err(ProviderError::Read { .. })
        ));

        fs::write(dir.path().join("bad.json"), "{oops").unwrap();
        assert!(matches!(
            LocalProvider::new(&context(&dir), "sub", options("bad.json")),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn test_reload_picks_up_changes_and_keeps_state_on_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub.json");
        fs::write(&path, TWO).unwrap();
        let provider = LocalProvider::new(&context(&dir), "sub", options("sub.json")).unwrap();
        let hk = provider.outbound("hk-01").unwrap();

        fs::write(&path, r#"[{"tag": "hk-01", "type": "direct"}]"#).unwrap();
        assert_eq!(provider.reload(), ReloadOutcome::Reloaded);
        assert_eq!(provider.outbounds().len(), 1);
        assert!(Arc::ptr_eq(&hk, &provider.outbound("hk-01").unwrap()));

        fs::write(&path, "not json").unwrap();
        assert_eq!(provider.reload(), ReloadOutcome::Failed);
        assert_eq!(provider.outbounds().len(), 1);
        assert!(!provider.is_updating());
    }

    #[test]
    fn test_reload_of_truncated_file_keeps_outbounds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub.json");
        fs::write(&path, TWO).unwrap();
        let provider = LocalProvider::new(&context(&dir), "sub", options("sub.json")).unwrap();
        let jp = provider.outbound("jp-01").unwrap();

        fs::write(&path, "").unwrap();
        assert_eq!(provider.reload(), ReloadOutcome::Failed);
        assert_eq!(provider.outbounds().len(), 2);
        assert!(Arc::ptr_eq(&jp, &provider.outbound("jp-01").unwrap()));

        fs::write(&path, "[]").unwrap();
        assert_eq!(provider.reload(), ReloadOutcome::Reloaded);
        assert!(provider.outbounds().is_empty());
    }

    #[test]
    fn test_reload_coalesces_while_in_flight() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub.json");
        fs::write(&path, TWO).unwrap();
        let provider = LocalProvider::new(&context(&dir), "sub", options("sub.json")).unwrap();

        fs::write(&path, "[]").unwrap();
        let ticket = provider.guard.try_begin().unwrap();
        assert!(provider.is_updating());
        assert_eq!(provider.reload(), ReloadOutcome::Coalesced);
        assert_eq!(provider.reload(), ReloadOutcome::Coalesced);
        assert_eq!(provider.outbounds().len(), 2);
        drop(ticket);

        assert_eq!(provider.reload(), ReloadOutcome::Reloaded);
        assert!(provider.outbounds().is_empty());
    }

    #[tokio::test]
    async fn test_watcher_reloads_on_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub.json");
        fs::write(&path, TWO).unwrap();
        let provider = LocalProvider::new(&context(&dir), "sub", options("sub.json")).unwrap();
        provider.start().unwrap();

        fs::write(&path, r#"[{"tag": "us-01", "type": "direct"}]"#).unwrap();

        let mut reloaded = false;
        for _ in 0..50 {
            if provider.outbound("us-01").is_some() {
                reloaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(reloaded, "watcher did not reload the provider");

        provider.close();
        assert!(provider.outbounds().is_empty());
    }
}
