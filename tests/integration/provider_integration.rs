//! Provider integration tests
//!
//! Rewrites provider files under a running [`Router`] and checks that the
//! bound selectors follow: new members appear, unchanged members keep their
//! instance, a removed active member is replaced, and broken or truncated
//! files change nothing.
//!
//! New content is written to a sibling file and renamed into place, so the
//! watcher only ever sees complete files unless a test truncates on purpose.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use selector_router::config::load_config_str;
use selector_router::provider::ProviderContext;
use selector_router::{Config, Router};

// ============================================================================
// Test Helpers
// ============================================================================

const US_TWO: &str = r#"{"outbounds": [
    {"tag": "us-1", "type": "direct"},
    {"tag": "us-2", "type": "direct"},
    {"tag": "hk-1", "type": "direct"}
]}"#;

fn write(dir: &TempDir, name: &str, content: &str) {
    let staging = dir.path().join(format!(".{name}.tmp"));
    fs::write(&staging, content).unwrap();
    fs::rename(&staging, dir.path().join(name)).unwrap();
}

fn config(dir: &Path, selector: &str) -> Config {
    let json = format!(
        r#"{{
            "outbounds": [{{"tag": "direct", "type": "direct"}}],
            "providers": [
                {{"tag": "us", "type": "local", "path": "us.json"}},
                {{"tag": "eu", "type": "local", "path": "eu.json"}}
            ],
            "selectors": [{selector}],
            "base_dir": {:?}
        }}"#,
        dir.display().to_string()
    );
    load_config_str(&json).unwrap()
}

fn setup(selector: &str) -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    write(&dir, "us.json", US_TWO);
    write(&dir, "eu.json", r#"[{"tag": "de-1", "type": "direct"}]"#);
    let router = Router::new(&config(dir.path(), selector)).unwrap();
    router.start().unwrap();
    (dir, router)
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}

const PROXY: &str = r#"{"tag": "proxy", "outbounds": ["direct"], "providers": ["us"], "include": "^us"}"#;

// ============================================================================
// Reload Tests
// ============================================================================

#[tokio::test]
async fn test_file_change_adds_members() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    assert_eq!(proxy.all(), vec!["direct", "us-1", "us-2"]);

    write(
        &dir,
        "us.json",
        r#"[{"tag": "us-1", "type": "direct"}, {"tag": "us-2", "type": "direct"},
            {"tag": "us-3", "type": "direct"}, {"tag": "jp-1", "type": "direct"}]"#,
    );

    assert!(wait_for(|| proxy.all().len() == 4).await, "selector did not follow the provider");
    assert_eq!(proxy.all(), vec!["direct", "us-1", "us-2", "us-3"]);
}

#[tokio::test]
async fn test_reload_keeps_selection_and_instances() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    let provider = router.providers().provider("us").unwrap();
    let us2 = provider.outbound("us-2").unwrap();
    assert!(router.select("proxy", "us-2").unwrap());

    write(
        &dir,
        "us.json",
        r#"[{"tag": "us-2", "type": "direct"}, {"tag": "us-4", "type": "direct"}]"#,
    );

    assert!(wait_for(|| proxy.all().contains(&"us-4".to_string())).await);
    assert_eq!(proxy.now(), "us-2");
    assert!(Arc::ptr_eq(&us2, &provider.outbound("us-2").unwrap()));
    assert_eq!(router.store().load_selected("proxy").as_deref(), Some("us-2"));
}

#[tokio::test]
async fn test_truncated_file_keeps_members_and_selection() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    assert!(router.select("proxy", "us-2").unwrap());
    let before = proxy.all();

    fs::write(dir.path().join("us.json"), "").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(proxy.all(), before);
    assert_eq!(proxy.now(), "us-2");
    assert_eq!(router.store().load_selected("proxy").as_deref(), Some("us-2"));
    assert!(router.providers().provider("us").unwrap().outbound("us-2").is_some());
}

#[tokio::test]
async fn test_removed_active_member_is_replaced() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    assert!(router.select("proxy", "us-2").unwrap());

    write(&dir, "us.json", r#"[{"tag": "us-1", "type": "direct"}]"#);

    assert!(wait_for(|| proxy.now() != "us-2").await, "active member was not replaced");
    assert_eq!(proxy.now(), "direct");
    assert_eq!(proxy.all(), vec!["direct", "us-1"]);
    assert_eq!(router.store().load_selected("proxy").as_deref(), Some("direct"));
}

#[tokio::test]
async fn test_broken_file_keeps_members() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    let before = proxy.all();

    write(&dir, "us.json", "{ not json");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(proxy.all(), before);

    write(&dir, "us.json", r#"[{"tag": "us-9", "type": "direct"}]"#);
    assert!(wait_for(|| proxy.all() == vec!["direct", "us-9"]).await);
}

#[tokio::test]
async fn test_emptied_provider_falls_back_to_compatible() {
    let (dir, router) = setup(r#"{"tag": "proxy", "providers": ["us"]}"#);
    let proxy = router.selector("proxy").unwrap();
    assert_eq!(proxy.now(), "us-1");

    write(&dir, "us.json", "[]");

    assert!(wait_for(|| proxy.now() == "Compatible").await);
    assert_eq!(proxy.all(), vec!["Compatible"]);
}

// ============================================================================
// Binding Tests
// ============================================================================

#[tokio::test]
async fn test_replaced_provider_is_followed() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    assert_eq!(proxy.all(), vec!["direct", "us-1", "us-2"]);

    write(&dir, "us-next.json", r#"[{"tag": "us-7", "type": "direct"}]"#);
    let ctx = ProviderContext::new(Arc::clone(router.outbounds())).with_base_dir(dir.path());
    router
        .providers()
        .create(&ctx, "us", "local", serde_json::json!({"path": "us-next.json"}))
        .unwrap();
    assert_eq!(proxy.all(), vec!["direct", "us-7"]);

    write(
        &dir,
        "us-next.json",
        r#"[{"tag": "us-7", "type": "direct"}, {"tag": "us-8", "type": "direct"}]"#,
    );
    assert!(wait_for(|| proxy.all() == vec!["direct", "us-7", "us-8"]).await);
}

#[tokio::test]
async fn test_use_all_providers_in_registration_order() {
    let (_dir, router) = setup(r#"{"tag": "all", "use_all_providers": true, "exclude": "^hk"}"#);
    let all = router.selector("all").unwrap();
    assert_eq!(all.all(), vec!["us-1", "us-2", "de-1"]);
    assert!(all.has_provider("eu"));
}

#[tokio::test]
async fn test_unbound_provider_change_is_ignored() {
    let (dir, router) = setup(PROXY);
    let proxy = router.selector("proxy").unwrap();
    let eu = router.providers().provider("eu").unwrap();

    write(&dir, "eu.json", r#"[{"tag": "fr-1", "type": "direct"}]"#);

    assert!(wait_for(|| eu.outbound("fr-1").is_some()).await);
    assert_eq!(proxy.all(), vec!["direct", "us-1", "us-2"]);
}
