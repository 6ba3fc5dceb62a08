mod common;

use common::{Call, FakeDriver};
use modpilot::browser::MouseButton;
use modpilot::locator::{self, Gesture, Located, MenuAction, Strategy, TargetSpec};
use modpilot::MessageRef;
use std::time::Duration;

fn spec_ab() -> TargetSpec {
    TargetSpec::new("thing")
        .then(Strategy::new("A", "#a", Gesture::Click, Duration::from_millis(60)))
        .then(Strategy::new("B", "#b", Gesture::RightClick, Duration::from_millis(60)))
}

#[tokio::test]
async fn test_first_satisfied_strategy_halts_chain() {
    let driver = FakeDriver::new();
    driver.set_count("#a", 1).poison("#b");

    let located = locator::locate(&driver, &spec_ab()).await;
    let handle = located.handle().expect("A should match");
    assert_eq!(handle.strategy, "A");
    assert!(!driver.touched("#b"), "B must never be evaluated");
}

#[tokio::test]
async fn test_falls_through_to_second_strategy() {
    let driver = FakeDriver::new();
    driver.set_count("#b", 2);

    let located = locator::locate(&driver, &spec_ab()).await;
    let handle = located.handle().expect("B should match");
    assert_eq!(handle.strategy, "B");
    assert_eq!(handle.gesture, Gesture::RightClick);

    locator::activate(&driver, handle).await.unwrap();
    assert!(driver
        .calls()
        .contains(&Call::Click("#b".into(), 0, MouseButton::Right)));
}

#[tokio::test]
async fn test_exhaustion_reports_every_tried_strategy() {
    let driver = FakeDriver::new();
    match locator::locate(&driver, &spec_ab()).await {
        Located::NotFound { target, tried } => {
            assert_eq!(target, "thing");
            assert_eq!(tried, vec!["A", "B"]);
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_context_menu_hover_prelude_only_for_fallback() {
    let m = MessageRef {
        guild_id: "1".into(),
        channel_id: "2".into(),
        message_id: "3".into(),
    };
    let spec = locator::context_menu(&m, Duration::from_millis(60));
    let container = m.container_selector();

    let driver = FakeDriver::new();
    driver
        .set_count(&container, 1)
        .set_count(&spec.strategies[0].probe, 1);
    let located = locator::locate(&driver, &spec).await;
    assert_eq!(located.handle().unwrap().strategy, "right-click timestamp");
    assert!(!driver.calls().iter().any(|c| matches!(c, Call::Hover(_))));

    let driver = FakeDriver::new();
    driver
        .set_count(&container, 1)
        .set_count(&spec.strategies[1].probe, 1);
    let located = locator::locate(&driver, &spec).await;
    assert_eq!(located.handle().unwrap().strategy, "hover + more button");
    assert!(driver.calls().contains(&Call::Hover(container)));
}

#[tokio::test]
async fn test_menu_lookup_keeps_raw_texts() {
    let driver = FakeDriver::new();
    driver.set_texts(locator::MENU_ITEM, &["Add Reaction", "Reply in Thread"]);
    let lookup = locator::locate_menu_item(&driver, MenuAction::Reply).await;
    assert_eq!(lookup.index, None);
    assert_eq!(lookup.texts, vec!["Add Reaction", "Reply in Thread"]);
    assert!(lookup.element().is_none());
}
