use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use kensho::{
    call_site, example_body, CallSite, CollectingReporter, ContextArena, EngineConfig,
    ExampleSuite, FailureKind, FutureValue, LeafNode, Matching, Value,
};
use tokio::time::sleep;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn site(line: u32) -> CallSite {
    CallSite::new("async_test.rs", line)
}

struct FlagIsSet {
    flag: Arc<AtomicBool>,
}

impl Matching for FlagIsSet {
    fn evaluate(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn failure_message_for_should(&self) -> String {
        "expected flag to be set".to_string()
    }

    fn failure_message_for_should_not(&self) -> String {
        "expected flag not to be set".to_string()
    }

    fn evaluates_multiple_times(&self) -> bool {
        true
    }
}

/// 少し待ってからフラグを立てるタスクを流す
fn set_after(flag: &Arc<AtomicBool>, delay: Duration) {
    let flag = flag.clone();
    tokio::spawn(async move {
        sleep(delay).await;
        flag.store(true, Ordering::SeqCst);
    });
}

#[tokio::test]
async fn test_eventual_expectation_polls_until_satisfied() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "eventually").unwrap();

    let shared = flag.clone();
    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "resolves before the default timeout",
                example_body(move |mut ctx| {
                    let flag = shared.clone();
                    Box::pin(async move {
                        set_after(&flag, Duration::from_millis(150));
                        ctx.should_eventually(call_site!());
                        ctx.complete(Box::new(FlagIsSet { flag: flag.clone() })).await;
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let reporter = CollectingReporter::new();
    let summary = suite.run_all(&reporter).await.unwrap();
    assert_eq!(summary.passed, 1, "failures: {:?}", reporter.failures());
}

#[tokio::test]
async fn test_elapsed_deadline_reports_timeout_with_call_site() {
    let flag = Arc::new(AtomicBool::new(false));
    let attach_site = Arc::new(Mutex::new(None));
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "timeout").unwrap();

    let shared = flag.clone();
    let recorded = attach_site.clone();
    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "never satisfied",
                example_body(move |mut ctx| {
                    let flag = shared.clone();
                    let recorded = recorded.clone();
                    Box::pin(async move {
                        let here = call_site!();
                        *recorded.lock().expect("site lock") = Some(here.clone());
                        ctx.should_eventually_within(Duration::from_millis(250), here);
                        ctx.complete(Box::new(FlagIsSet { flag: flag.clone() })).await;
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let reporter = CollectingReporter::new();
    let summary = suite.run_all(&reporter).await.unwrap();

    assert_eq!(summary.failed, 1);
    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::AsyncTimeout);
    let expected_site = attach_site.lock().expect("site lock").clone().unwrap();
    assert_eq!(failures[0].call_site, expected_site);
    assert!(failures[0].message.contains("expected flag to be set"));
}

#[tokio::test]
async fn test_blocking_wait_suspends_the_body_until_resolution() {
    let flag = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "wait").unwrap();

    let shared = flag.clone();
    let order_log = order.clone();
    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "continues after the wait",
                example_body(move |mut ctx| {
                    let flag = shared.clone();
                    let order = order_log.clone();
                    Box::pin(async move {
                        set_after(&flag, Duration::from_millis(150));
                        order.lock().expect("order lock").push("before wait");
                        ctx.should_after_wait_of(Duration::from_secs(1), call_site!());
                        ctx.complete(Box::new(FlagIsSet { flag: flag.clone() })).await;
                        // ここに来た時点で解決済みでなければならない
                        order.lock().expect("order lock").push(if flag.load(Ordering::SeqCst) {
                            "after wait, resolved"
                        } else {
                            "after wait, unresolved"
                        });
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let summary = suite.run_all(&CollectingReporter::new()).await.unwrap();

    assert_eq!(summary.passed, 1);
    assert_eq!(
        order.lock().expect("order lock").clone(),
        vec!["before wait", "after wait, resolved"]
    );
}

#[tokio::test]
async fn test_should_not_eventually_satisfied_when_expectation_met() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "negative").unwrap();

    let shared = flag.clone();
    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "flag stays unset",
                example_body(move |mut ctx| {
                    let flag = shared.clone();
                    Box::pin(async move {
                        ctx.should_not_eventually(call_site!());
                        ctx.complete(Box::new(FlagIsSet { flag: flag.clone() })).await;
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let summary = suite.run_all(&CollectingReporter::new()).await.unwrap();
    assert_eq!(summary.passed, 1);
}

#[tokio::test]
async fn test_future_value_subject_is_read_at_evaluation_time() {
    let slot: Arc<Mutex<Value>> = Arc::new(Mutex::new(Value::Null));
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "future").unwrap();

    let shared = slot.clone();
    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "subject appears after attachment",
                example_body(move |mut ctx| {
                    let slot = shared.clone();
                    Box::pin(async move {
                        let reader = slot.clone();
                        // attach 時点では Null、評価は example 終了時
                        ctx.should_exist(
                            FutureValue::new(move || reader.lock().expect("slot lock").clone()),
                            call_site!(),
                        );
                        *slot.lock().expect("slot lock") = Value::Integer(7);
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let reporter = CollectingReporter::new();
    let summary = suite.run_all(&reporter).await.unwrap();
    assert_eq!(summary.passed, 1, "failures: {:?}", reporter.failures());
}

#[tokio::test]
async fn test_incomplete_chain_on_null_subject_yields_one_unresolved_failure() {
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "incomplete").unwrap();

    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "starts a chain and drops it",
                example_body(|mut ctx| {
                    Box::pin(async move {
                        // null の対象に続く matcher 呼び出しが消えたケース
                        ctx.should_not(call_site!());
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let reporter = CollectingReporter::new();
    let summary = suite.run_all(&reporter).await.unwrap();

    assert_eq!(summary.failed, 1);
    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::UnresolvedAssertion);
}

#[tokio::test]
async fn test_async_timeout_and_body_failure_are_two_distinct_failures() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut arena = ContextArena::new(site(1));
    let ctx_id = arena.add_child_context(arena.root(), site(2), "both").unwrap();

    let shared = flag.clone();
    arena
        .add_leaf(
            ctx_id,
            LeafNode::it(
                site(3),
                "fails twice",
                example_body(move |mut ctx| {
                    let flag = shared.clone();
                    Box::pin(async move {
                        ctx.should_eventually_within(Duration::from_millis(250), call_site!());
                        ctx.complete(Box::new(FlagIsSet { flag: flag.clone() })).await;
                        ctx.should(call_site!());
                        ctx.complete(Box::new(FlagIsSet { flag: flag.clone() })).await;
                        ctx
                    })
                }),
            ),
        )
        .unwrap();

    let mut suite = ExampleSuite::build(arena, EngineConfig::default()).unwrap();
    let reporter = CollectingReporter::new();
    let summary = suite.run_all(&reporter).await.unwrap();

    assert_eq!(summary.failed, 1);
    let failures = reporter.failures();
    assert_eq!(failures.len(), 2);
    // 即時検証の失敗が先、非ブロックのポーリング検証の失敗は example 終了時
    assert_eq!(failures[0].kind, FailureKind::Expectation);
    assert_eq!(failures[1].kind, FailureKind::AsyncTimeout);
    assert_ne!(failures[0].call_site, failures[1].call_site);
}
