use std::{fmt, time::Duration};

use crate::{
    call_site::CallSite,
    matcher::Matching,
    probe::{self, ProbeOutcome},
    report::{Failure, FailureKind},
    value::Subject,
};

/// 期待の向き
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Should,
    ShouldNot,
}

/// Verifier の種別。capability の違いはタグで明示的に分岐する。
pub enum VerifierKind {
    /// attach した場所で同期評価される
    ImmediateMatch,
    /// example 終了時に評価される存在検証。対象が Null でも正しく判定できる。
    DeferredExistence { subject: Subject },
    /// ポーリング評価。`blocks_body` なら attach 地点で解決まで待つ。
    AsyncPoll { timeout: Duration, blocks_body: bool },
}

/// example に attach される 1 つの検証ハンドル
pub struct Verifier {
    pub expectation: Expectation,
    pub call_site: CallSite,
    pub kind: VerifierKind,
    pub(crate) matcher: Option<Box<dyn Matching>>,
}

impl Verifier {
    pub(crate) fn new(expectation: Expectation, call_site: CallSite, kind: VerifierKind) -> Self {
        Self {
            expectation,
            call_site,
            kind,
            matcher: None,
        }
    }

    /// チェーンを具体的な matcher で完了させる
    pub(crate) fn attach_matcher(&mut self, mut matcher: Box<dyn Matching>) {
        if self.expectation == Expectation::ShouldNot {
            matcher.set_negative_expectation(true);
        }
        if matches!(self.kind, VerifierKind::AsyncPoll { .. }) {
            matcher.set_evaluates_multiple_times(true);
        }
        self.matcher = Some(matcher);
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.matcher.is_some() || matches!(self.kind, VerifierKind::DeferredExistence { .. })
    }

    fn expectation_met(&self, result: bool) -> bool {
        match self.expectation {
            Expectation::Should => result,
            Expectation::ShouldNot => !result,
        }
    }

    fn matcher_failure_message(&self) -> String {
        match (&self.matcher, self.expectation) {
            (Some(matcher), Expectation::Should) => matcher.failure_message_for_should(),
            (Some(matcher), Expectation::ShouldNot) => matcher.failure_message_for_should_not(),
            (None, _) => "assertion chain left incomplete".to_string(),
        }
    }

    /// ImmediateMatch の評価。失敗しても body は続行される (short-circuit しない)。
    pub(crate) fn evaluate_immediate(&self) -> Option<Failure> {
        let Some(matcher) = &self.matcher else {
            return Some(self.unresolved_failure());
        };
        if self.expectation_met(matcher.evaluate()) {
            None
        } else {
            Some(Failure::new(
                FailureKind::Expectation,
                self.call_site.clone(),
                self.matcher_failure_message(),
            ))
        }
    }

    /// 存在検証の評価。評価時点の対象を読む。
    pub(crate) fn evaluate_existence(&self) -> Option<Failure> {
        let VerifierKind::DeferredExistence { subject } = &self.kind else {
            return None;
        };
        let value = subject.current();
        if self.expectation_met(!value.is_null()) {
            return None;
        }
        let message = match self.expectation {
            Expectation::Should => "expected subject to exist, but it was null".to_string(),
            Expectation::ShouldNot => {
                format!("expected subject not to exist, but it was {}", value)
            }
        };
        Some(Failure::new(
            FailureKind::Expectation,
            self.call_site.clone(),
            message,
        ))
    }

    /// ポーリング評価。期待が満たされるまで現在のタスク上で待つ。
    pub(crate) async fn evaluate_poll(&self) -> Option<Failure> {
        let VerifierKind::AsyncPoll { timeout, .. } = self.kind else {
            return None;
        };
        let Some(matcher) = &self.matcher else {
            return Some(self.unresolved_failure());
        };
        match probe::run_probe(|| self.expectation_met(matcher.evaluate()), timeout).await {
            ProbeOutcome::Satisfied => None,
            ProbeOutcome::TimedOut => Some(Failure::new(
                FailureKind::AsyncTimeout,
                self.call_site.clone(),
                format!(
                    "{} (timed out after {:?}; the suite was blocked while waiting)",
                    self.matcher_failure_message(),
                    timeout
                ),
            )),
        }
    }

    pub(crate) fn unresolved_failure(&self) -> Failure {
        Failure::new(
            FailureKind::UnresolvedAssertion,
            self.call_site.clone(),
            "assertion chain left incomplete".to_string(),
        )
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("expectation", &self.expectation)
            .field("call_site", &self.call_site)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}
