use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    context::{ContextArena, NodeId},
    error::EngineResult,
    example::{Example, ExampleState},
    flatten,
    report::{BroadcastReporter, ReportEvent, ReportEventKind, Reporting, SuiteSummary},
};

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Structural error in context tree: {0}")]
    Structural(String),
    #[error("Unknown example identifier: {0}")]
    UnknownIdentifier(String),
}

/// 識別子用に説明を整形する。英数字以外の連続は `_` 1 つに潰す。
fn sanitize_identifier(description: &str) -> String {
    let mut out = String::with_capacity(description.len());
    for ch in description.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "example".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 衝突した説明から一意な識別子を決定的に採番する (`name`, `name_2`, `name_3`, ...)
#[derive(Debug, Default)]
struct IdentifierRegistry {
    counts: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl IdentifierRegistry {
    fn next_unique(&mut self, name: &str) -> String {
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        let mut candidate = if *count == 1 {
            name.to_string()
        } else {
            format!("{}_{}", name, count)
        };
        // 枝番つきの説明が先に宣言されていた場合も重複しないように進める
        while !self.taken.insert(candidate.clone()) {
            let count = self
                .counts
                .get_mut(name)
                .expect("registry entry inserted above");
            *count += 1;
            candidate = format!("{}_{}", name, count);
        }
        candidate
    }
}

/// root context を所有し、平坦化済みの Example 列を実行順に持つ。
/// 木は build 時に一度だけ平坦化され、以後は読み取り専用。
pub struct ExampleSuite {
    arena: ContextArena,
    examples: Vec<Example>,
    config: EngineConfig,
    /// beforeAll を発火済みの context。subtree 内の最初の activation の
    /// 直前に 1 回だけ発火させるための記録。
    started_contexts: HashSet<NodeId>,
}

impl ExampleSuite {
    /// 木を検証・平坦化し、各 example に一意な識別子を採番する。
    /// 構造が壊れた木は組み立て自体を中断する。
    pub fn build(arena: ContextArena, config: EngineConfig) -> EngineResult<Self> {
        arena
            .validate()
            .map_err(|e| SuiteError::Structural(e.to_string()))?;
        let mut examples =
            flatten::flatten(&arena).map_err(|e| SuiteError::Structural(e.to_string()))?;

        let mut registry = IdentifierRegistry::default();
        for example in &mut examples {
            example.identifier = registry.next_unique(&sanitize_identifier(&example.full_description));
        }
        debug!(examples = examples.len(), "example suite built");

        Ok(Self {
            arena,
            examples,
            config,
            started_contexts: HashSet::new(),
        })
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// 設定のバッファサイズでホストランナー向けの broadcast reporter を作る
    pub fn broadcast_reporter(&self) -> BroadcastReporter {
        BroadcastReporter::new(self.config.event_buffer_size)
    }

    pub fn example(&self, identifier: &str) -> Option<&Example> {
        self.examples.iter().find(|e| e.identifier == identifier)
    }

    /// suite 順にすべて実行する。example は厳密に 1 つずつ進む。
    pub async fn run_all(&mut self, reporter: &dyn Reporting) -> EngineResult<SuiteSummary> {
        self.report(
            reporter,
            ReportEventKind::SuiteStarted {
                total: self.examples.len(),
            },
        )
        .await;

        for idx in 0..self.examples.len() {
            self.run_at(idx, reporter).await;
        }

        let summary = self.summary();
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "suite finished"
        );
        self.report(reporter, ReportEventKind::SuiteFinished { summary }).await;
        Ok(summary)
    }

    /// 識別子を指定して 1 件だけ実行する
    pub async fn run_example(
        &mut self,
        identifier: &str,
        reporter: &dyn Reporting,
    ) -> EngineResult<ExampleState> {
        let idx = self
            .examples
            .iter()
            .position(|e| e.identifier == identifier)
            .ok_or_else(|| SuiteError::UnknownIdentifier(identifier.to_string()))?;
        self.run_at(idx, reporter).await;
        Ok(self.examples[idx].state)
    }

    async fn run_at(&mut self, idx: usize, reporter: &dyn Reporting) {
        let identifier = self.examples[idx].identifier.clone();
        self.report(
            reporter,
            ReportEventKind::ExampleStarted {
                identifier: identifier.clone(),
            },
        )
        .await;

        if self.examples[idx].state == ExampleState::Skipped {
            debug!(%identifier, "example skipped");
        } else {
            // beforeAll: subtree 内の最初の activation の直前に、外側から 1 回ずつ
            let chain = self.examples[idx].ancestor_chain.clone();
            for id in &chain {
                if self.started_contexts.insert(*id) {
                    if let Ok(node) = self.arena.get(*id) {
                        if let Some(hook) = &node.before_all {
                            hook();
                        }
                    }
                }
            }

            let timeout = self.config.default_probe_timeout;
            self.examples[idx].run(&self.arena, timeout).await;

            let failures = self.examples[idx].failures.clone();
            for failure in failures {
                self.report(
                    reporter,
                    ReportEventKind::FailureReported {
                        identifier: identifier.clone(),
                        failure,
                    },
                )
                .await;
            }
        }

        let state = self.examples[idx].state;
        self.report(
            reporter,
            ReportEventKind::ExampleFinished {
                identifier,
                state,
            },
        )
        .await;

        // afterAll: この context の最後の activation の直後に 1 回だけ。
        // 一度も activation が走らなかった context では発火しない。
        let due = self.examples[idx].last_in_contexts.clone();
        for id in due {
            if self.started_contexts.contains(&id) {
                if let Ok(node) = self.arena.get(id) {
                    if let Some(hook) = &node.after_all {
                        hook();
                    }
                }
            }
        }
    }

    async fn report(&self, reporter: &dyn Reporting, kind: ReportEventKind) {
        if let Err(e) = reporter.report(ReportEvent::new(kind)).await {
            warn!("failed to report suite event: {}", e);
        }
    }

    fn summary(&self) -> SuiteSummary {
        let mut summary = SuiteSummary {
            total: self.examples.len(),
            ..SuiteSummary::default()
        };
        for example in &self.examples {
            match example.state {
                ExampleState::Passed => summary.passed += 1,
                ExampleState::Failed => summary.failed += 1,
                ExampleState::Skipped => summary.skipped += 1,
                ExampleState::Pending | ExampleState::Running => {}
            }
        }
        summary
    }
}
