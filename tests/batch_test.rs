mod common;

use common::{fast_timing, init_logger, message_node, FakeDriver};
use modpilot::audit::{self, AuditOptions};
use modpilot::fanout::{self, FanoutTargets, LangGroup};
use modpilot::features::pacing::{ManualClock, PacingStore};
use modpilot::locator;
use modpilot::purge::{self, PurgeOptions};
use modpilot::tools::ActionExecutor;
use modpilot::{AccessibilityNode, AuthorThemes, ChannelRef, RunArtifacts};
use std::time::Duration;

const ORIGIN: &str = "https://discord.com";

fn channel(id: &str) -> ChannelRef {
    ChannelRef {
        guild_id: "111".into(),
        channel_id: id.into(),
    }
}

fn read_json(path: std::path::PathBuf) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_audit_with_null_tree_still_reports_ok() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    driver.set_accessibility(None);

    let opts = AuditOptions {
        url: Some("https://discord.com/channels/111/222".into()),
        login_wait: Duration::from_secs(1),
        poll: Duration::from_millis(50),
        ..Default::default()
    };
    let result = audit::audit(&driver, &artifacts, &opts).await.unwrap();

    assert!(result.ok);
    assert_eq!(result.channel_items_count, 0);
    assert_eq!(result.entries_count, 0);
    assert_eq!(result.channel, Some(channel("222")));

    assert_eq!(read_json(artifacts.path("a11y.json")), serde_json::Value::Null);
    assert_eq!(read_json(artifacts.path("a11y_flat.json")), serde_json::json!([]));
    let saved = read_json(artifacts.path("result.json"));
    assert_eq!(saved["ok"], true);
    assert_eq!(saved["channelItemsCount"], 0);
}

#[tokio::test]
async fn test_audit_counts_channel_items() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    let tree = AccessibilityNode::new("WebArea", "").with_children(vec![
        AccessibilityNode::new("heading", "Text Channels").with_children(vec![
            AccessibilityNode::new("treeitem", "general"),
            AccessibilityNode::new("treeitem", "support"),
        ]),
    ]);
    driver.set_accessibility(Some(tree));

    let opts = AuditOptions {
        url: Some("https://discord.com/channels/111/222".into()),
        login_wait: Duration::from_secs(1),
        poll: Duration::from_millis(50),
        ..Default::default()
    };
    let result = audit::audit(&driver, &artifacts, &opts).await.unwrap();
    assert_eq!(result.channel_items_count, 2);
    assert_eq!(result.headings_count, 1);
    let summary = read_json(artifacts.path("summary.json"));
    assert_eq!(summary[1], "treeitem:general");
}

#[tokio::test]
async fn test_audit_times_out_off_channel() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();

    let opts = AuditOptions {
        url: Some("https://discord.com/login".into()),
        login_wait: Duration::from_millis(150),
        poll: Duration::from_millis(50),
        ..Default::default()
    };
    let result = audit::audit(&driver, &artifacts, &opts).await.unwrap();
    assert!(!result.ok);
    assert_eq!(result.url, "https://discord.com/login");
    assert!(result.error.is_some());
    assert!(result.screenshot_path.is_some());
}

#[tokio::test]
async fn test_purge_with_no_matches_ends_on_first_round() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    driver.set_nodes(vec![message_node("222", "1", "bot", "just chatting")]);

    let exec = ActionExecutor::new(&driver, &artifacts, fast_timing(), ORIGIN);
    let opts = PurgeOptions {
        channel: channel("222"),
        author: Some("bot".into()),
        rounds: 5,
        scroll_up_steps: 2,
    };
    let pacing = PacingStore::new(ManualClock::at(0));
    let report = purge::purge(&exec, &opts, &pacing).await.unwrap();

    assert_eq!(report.rounds_run, 1);
    assert!(report.deleted.is_empty());
    assert!(report.errors.is_empty());
    let saved = read_json(artifacts.path("run.json"));
    assert_eq!(saved["deleted"], serde_json::json!([]));
}

#[tokio::test]
async fn test_purge_isolates_failures_and_skips_attempted_ids() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    let ok = r#"li[id="chat-messages-222-10"]"#;
    let submit = r#"[role="dialog"] button[type="submit"]"#;
    driver
        .set_nodes(vec![
            message_node("222", "10", "SupportBot", "Sorry for the inconvenience"),
            message_node("222", "11", "SupportBot", "非常抱歉"),
            message_node("222", "12", "Human", "sorry for the inconvenience"),
        ])
        .set_count(ok, 1)
        .set_count(&format!("{} time", ok), 1)
        .set_count(locator::MENU, 1)
        .set_count(locator::MENU_ITEM, 1)
        .set_texts(locator::MENU_ITEM, &["Delete Message"])
        .when_clicked(locator::MENU_ITEM, submit, 1)
        .when_clicked(submit, ok, 0);

    let exec = ActionExecutor::new(&driver, &artifacts, fast_timing(), ORIGIN);
    let opts = PurgeOptions {
        channel: channel("222"),
        author: Some("supportbot".into()),
        rounds: 4,
        scroll_up_steps: 1,
    };
    let pacing = PacingStore::new(ManualClock::at(0));
    let report = purge::purge(&exec, &opts, &pacing).await.unwrap();

    assert_eq!(report.deleted.len(), 1);
    assert_eq!(report.deleted[0].message_id, "10");
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].message_id, "11");
    assert!(report.errors[0].screenshot_path.is_some());
    assert!(report.has_failures());
    // Round 2 sees the same DOM but every id was already attempted.
    assert_eq!(report.rounds_run, 2);
    assert!(artifacts.path("actions.json").exists());
}

#[tokio::test]
async fn test_purge_scan_failure_is_reported() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    driver.fail_reads();

    let exec = ActionExecutor::new(&driver, &artifacts, fast_timing(), ORIGIN);
    let opts = PurgeOptions {
        channel: channel("222"),
        author: Some("bot".into()),
        rounds: 3,
        scroll_up_steps: 0,
    };
    let pacing = PacingStore::new(ManualClock::at(0));
    let report = purge::purge(&exec, &opts, &pacing).await.unwrap();

    assert!(report.has_failures());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].round, 1);
    assert!(report.errors[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("scan failed"));
    let saved = read_json(artifacts.path("run.json"));
    assert_eq!(saved["errors"].as_array().unwrap().len(), 1);
}

#[test]
fn test_fanout_grouping_by_language() {
    let items = vec![
        AuthorThemes {
            author: "a".into(),
            lang: "zh".into(),
            themes: vec!["shipping/delivery".into()],
        },
        AuthorThemes {
            author: "b".into(),
            lang: "en".into(),
            themes: vec![],
        },
    ];
    let groups = fanout::group_by_channel(&items);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[&LangGroup::Zh].len(), 1);
    assert_eq!(groups[&LangGroup::Zh][0].author, "a");
    assert_eq!(groups[&LangGroup::General].len(), 1);
    assert_eq!(groups[&LangGroup::General][0].author, "b");
}

#[tokio::test]
async fn test_fanout_posts_one_message_per_author_per_channel() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    driver
        .live_composer()
        .set_texts(locator::COMPOSER_FORM, &["Message #support"]);

    let items = vec![
        AuthorThemes {
            author: "a".into(),
            lang: "zh".into(),
            themes: vec!["shipping/delivery".into()],
        },
        AuthorThemes {
            author: "b".into(),
            lang: "en".into(),
            themes: vec![],
        },
    ];
    let targets = FanoutTargets {
        zh: channel("900"),
        general: channel("901"),
    };
    let exec = ActionExecutor::new(&driver, &artifacts, fast_timing(), ORIGIN);
    let pacing = PacingStore::new(ManualClock::at(0));
    let report = fanout::fanout(&exec, &items, &targets, Duration::ZERO, &pacing)
        .await
        .unwrap();

    assert_eq!(report.sent.len(), 2);
    assert!(report.errors.is_empty());
    assert_eq!(
        driver.navigations(),
        vec![
            "https://discord.com/channels/111/900",
            "https://discord.com/channels/111/901"
        ]
    );
    assert_eq!(
        driver.typed(),
        vec![
            fanout::render_message(&items[0]),
            fanout::render_message(&items[1])
        ]
    );
    assert!(artifacts.path("fanout.json").exists());
}

#[tokio::test]
async fn test_fanout_gap_counts_from_end_of_previous_post() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let clock = ManualClock::at(0);
    let driver = FakeDriver::new();
    driver
        .live_composer()
        .set_texts(locator::COMPOSER_FORM, &["Message #general"])
        .advance_on_type(clock.clone(), Duration::from_millis(1_000));

    let items = vec![
        AuthorThemes {
            author: "b".into(),
            lang: "en".into(),
            themes: vec![],
        },
        AuthorThemes {
            author: "c".into(),
            lang: "en".into(),
            themes: vec![],
        },
    ];
    let targets = FanoutTargets {
        zh: channel("900"),
        general: channel("901"),
    };
    let exec = ActionExecutor::new(&driver, &artifacts, fast_timing(), ORIGIN);
    let pacing = PacingStore::new(clock);
    let started = std::time::Instant::now();
    let report = fanout::fanout(&exec, &items, &targets, Duration::from_millis(300), &pacing)
        .await
        .unwrap();

    assert_eq!(report.sent.len(), 2);
    // The first send outlasts the delay; the second still waits the full gap.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_fanout_refuses_to_post_while_stuck_replying() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let artifacts = RunArtifacts::at(dir.path()).unwrap();
    let driver = FakeDriver::new();
    driver
        .set_count(locator::COMPOSER, 1)
        .set_texts(locator::COMPOSER_FORM, &["Replying to someone"]);

    let items = vec![AuthorThemes {
        author: "b".into(),
        lang: "en".into(),
        themes: vec!["bug".into()],
    }];
    let targets = FanoutTargets {
        zh: channel("900"),
        general: channel("901"),
    };
    let exec = ActionExecutor::new(&driver, &artifacts, fast_timing(), ORIGIN);
    let pacing = PacingStore::new(ManualClock::at(0));
    let report = fanout::fanout(&exec, &items, &targets, Duration::ZERO, &pacing)
        .await
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].error.as_deref().unwrap().starts_with("Confirmed"));
    assert!(driver.typed().is_empty());
}
