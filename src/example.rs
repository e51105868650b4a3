use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    binding::{BindingProducer, BindingScope},
    call_site::CallSite,
    context::{ContextArena, NodeId},
    matcher::Matching,
    report::{Failure, FailureKind},
    value::{Subject, Value},
    verifier::{Expectation, Verifier, VerifierKind},
};

/// example の body。[`RunContext`] の所有権を受け取り、検証を attach して返す。
pub type ExampleBody = Arc<dyn Fn(RunContext) -> BoxFuture<'static, RunContext> + Send + Sync>;

/// closure を [`ExampleBody`] に包むヘルパー
pub fn example_body<F>(f: F) -> ExampleBody
where
    F: Fn(RunContext) -> BoxFuture<'static, RunContext> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// example の状態機械。Skipped は pending / focus 外の leaf が
/// Running を経由せずに直接到達する終端状態。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
pub enum ExampleState {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

/// 平坦化で得られた 1 つの実行単位。suite の順序がそのまま実行・報告順。
pub struct Example {
    /// suite が採番する一意な識別子
    pub identifier: String,
    pub description: String,
    /// 祖先 context の説明を leaf まで連結したもの
    pub full_description: String,
    pub call_site: CallSite,
    pub(crate) ancestor_chain: Vec<NodeId>,
    pub(crate) body: Option<ExampleBody>,
    pub(crate) is_pending: bool,
    pub(crate) last_in_contexts: Vec<NodeId>,
    pub state: ExampleState,
    pub failures: Vec<Failure>,
}

impl Example {
    pub fn is_last_in_context(&self, node: NodeId) -> bool {
        self.last_in_contexts.contains(&node)
    }

    /// 非 skip の example を 1 回実行する。beforeEach は外側から、
    /// afterEach は内側から、失敗の有無にかかわらず必ず呼ぶ。
    pub(crate) async fn run(&mut self, arena: &ContextArena, default_timeout: Duration) {
        self.state = ExampleState::Running;

        for id in &self.ancestor_chain {
            if let Ok(node) = arena.get(*id) {
                if let Some(hook) = &node.before_each {
                    hook();
                }
            }
        }

        let parent = self
            .ancestor_chain
            .last()
            .copied()
            .unwrap_or_else(|| arena.root());
        let producers = arena.binding_chain(parent).unwrap_or_default();
        let mut ctx = RunContext::new(producers, default_timeout, self.call_site.clone());

        if let Some(body) = self.body.clone() {
            ctx = body(ctx).await;
        }
        ctx.finish().await;

        for id in self.ancestor_chain.iter().rev() {
            if let Ok(node) = arena.get(*id) {
                if let Some(hook) = &node.after_each {
                    hook();
                }
            }
        }

        self.failures = ctx.failures;
        self.state = if self.failures.is_empty() {
            ExampleState::Passed
        } else {
            ExampleState::Failed
        };
        debug!(identifier = %self.identifier, state = %self.state, "example finished");
    }
}

/// example 実行中の状態。束縛メモ、attach 済み verifier、未完了チェーンの
/// スロットを持ち、example が終わると破棄される。
pub struct RunContext {
    bindings: BindingScope,
    verifiers: Vec<Verifier>,
    unresolved: Option<Verifier>,
    failures: Vec<Failure>,
    default_timeout: Duration,
    leaf_site: CallSite,
}

impl RunContext {
    pub(crate) fn new(
        producers: HashMap<String, BindingProducer>,
        default_timeout: Duration,
        leaf_site: CallSite,
    ) -> Self {
        Self {
            bindings: BindingScope::new(producers),
            verifiers: Vec::new(),
            unresolved: None,
            failures: Vec::new(),
            default_timeout,
            leaf_site,
        }
    }

    /// 束縛を解決する。初回参照時に producer を評価し、この example の間だけ
    /// メモ化される。未宣言の名前は失敗として記録し `Null` を返す。
    pub fn binding(&mut self, name: &str) -> Value {
        if let Some(value) = self.bindings.resolve(name) {
            return value;
        }
        if !self.bindings.is_memoized(name) {
            self.record(Failure::new(
                FailureKind::MissingBinding,
                self.leaf_site.clone(),
                format!("binding `{}` is not declared in any enclosing context", name),
            ));
            self.bindings.memoize(name, Value::Null);
        }
        Value::Null
    }

    // ---- 検証チェーンの開始 ----

    /// 同期検証のチェーンを開始する。[`Self::complete`] で matcher を渡すと
    /// その場で評価される。
    pub fn should(&mut self, call_site: CallSite) {
        self.begin_chain(Expectation::Should, VerifierKind::ImmediateMatch, call_site);
    }

    pub fn should_not(&mut self, call_site: CallSite) {
        self.begin_chain(Expectation::ShouldNot, VerifierKind::ImmediateMatch, call_site);
    }

    /// ポーリング検証 (非ブロック)。評価は example 終了時。
    pub fn should_eventually(&mut self, call_site: CallSite) {
        self.should_eventually_within(self.default_timeout, call_site);
    }

    pub fn should_not_eventually(&mut self, call_site: CallSite) {
        self.should_not_eventually_within(self.default_timeout, call_site);
    }

    pub fn should_eventually_within(&mut self, timeout: Duration, call_site: CallSite) {
        self.begin_chain(
            Expectation::Should,
            VerifierKind::AsyncPoll {
                timeout,
                blocks_body: false,
            },
            call_site,
        );
    }

    pub fn should_not_eventually_within(&mut self, timeout: Duration, call_site: CallSite) {
        self.begin_chain(
            Expectation::ShouldNot,
            VerifierKind::AsyncPoll {
                timeout,
                blocks_body: false,
            },
            call_site,
        );
    }

    /// ポーリング検証 (ブロック)。[`Self::complete`] が解決まで待ち、
    /// その後 body の続きが実行される。
    pub fn should_after_wait(&mut self, call_site: CallSite) {
        self.should_after_wait_of(self.default_timeout, call_site);
    }

    pub fn should_not_after_wait(&mut self, call_site: CallSite) {
        self.should_not_after_wait_of(self.default_timeout, call_site);
    }

    pub fn should_after_wait_of(&mut self, timeout: Duration, call_site: CallSite) {
        self.begin_chain(
            Expectation::Should,
            VerifierKind::AsyncPoll {
                timeout,
                blocks_body: true,
            },
            call_site,
        );
    }

    pub fn should_not_after_wait_of(&mut self, timeout: Duration, call_site: CallSite) {
        self.begin_chain(
            Expectation::ShouldNot,
            VerifierKind::AsyncPoll {
                timeout,
                blocks_body: true,
            },
            call_site,
        );
    }

    fn begin_chain(&mut self, expectation: Expectation, kind: VerifierKind, call_site: CallSite) {
        let verifier = Verifier::new(expectation, call_site, kind);
        if let Some(previous) = self.unresolved.replace(verifier) {
            debug!(call_site = %previous.call_site, "unresolved assertion chain replaced");
        }
    }

    /// 開始済みのチェーンを matcher で完了させる。ImmediateMatch はこの場で
    /// 評価され、blocks_body のポーリング検証はこの場で解決まで待つ。
    pub async fn complete(&mut self, matcher: Box<dyn Matching>) {
        let Some(mut verifier) = self.unresolved.take() else {
            warn!("matcher attached with no assertion chain in progress");
            return;
        };
        verifier.attach_matcher(matcher);
        match verifier.kind {
            VerifierKind::ImmediateMatch => {
                if let Some(failure) = verifier.evaluate_immediate() {
                    self.record(failure);
                }
            }
            VerifierKind::AsyncPoll {
                blocks_body: true, ..
            } => {
                if let Some(failure) = verifier.evaluate_poll().await {
                    self.record(failure);
                }
            }
            _ => {}
        }
        self.verifiers.push(verifier);
    }

    // ---- 存在検証 (チェーンを作らず直接 attach、評価は example 終了時) ----

    pub fn should_exist(&mut self, subject: impl Into<Subject>, call_site: CallSite) {
        self.verifiers.push(Verifier::new(
            Expectation::Should,
            call_site,
            VerifierKind::DeferredExistence {
                subject: subject.into(),
            },
        ));
    }

    pub fn should_not_exist(&mut self, subject: impl Into<Subject>, call_site: CallSite) {
        self.verifiers.push(Verifier::new(
            Expectation::ShouldNot,
            call_site,
            VerifierKind::DeferredExistence {
                subject: subject.into(),
            },
        ));
    }

    /// body から直接 example を失敗させる
    pub fn report_failure(&mut self, failure: Failure) {
        self.record(failure);
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn record(&mut self, failure: Failure) {
        debug!(kind = %failure.kind, "{}", failure);
        self.failures.push(failure);
    }

    /// example 終了時の評価。attach 順に存在検証、次に非ブロックのポーリング
    /// 検証を評価し、最後に未完了チェーンを失敗として数える。
    pub(crate) async fn finish(&mut self) {
        let mut failures = Vec::new();
        for verifier in &self.verifiers {
            if matches!(verifier.kind, VerifierKind::DeferredExistence { .. }) {
                if let Some(failure) = verifier.evaluate_existence() {
                    failures.push(failure);
                }
            }
        }
        for verifier in &self.verifiers {
            if matches!(
                verifier.kind,
                VerifierKind::AsyncPoll {
                    blocks_body: false,
                    ..
                }
            ) {
                if let Some(failure) = verifier.evaluate_poll().await {
                    failures.push(failure);
                }
            }
        }
        if let Some(unresolved) = self.unresolved.take() {
            failures.push(unresolved.unresolved_failure());
        }
        self.failures.extend(failures);
    }
}
