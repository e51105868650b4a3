use std::{fmt, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{call_site::CallSite, example::ExampleState};

/// 失敗の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum FailureKind {
    /// matcher が期待を満たさなかった
    Expectation,
    /// 検証チェーンが matcher で完了されないまま example が終わった
    UnresolvedAssertion,
    /// ポーリング検証の期限切れ
    AsyncTimeout,
    /// 未宣言の束縛への参照
    MissingBinding,
}

/// 1 件の失敗。作成後は不変。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub call_site: CallSite,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, call_site: CallSite, message: impl Into<String>) -> Self {
        Self {
            kind,
            call_site,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.call_site, self.message)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportEventKind {
    SuiteStarted { total: usize },
    ExampleStarted { identifier: String },
    ExampleFinished { identifier: String, state: ExampleState },
    FailureReported { identifier: String, failure: Failure },
    SuiteFinished { summary: SuiteSummary },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub kind: ReportEventKind,
    pub timestamp: DateTime<Utc>,
}

impl ReportEvent {
    pub fn new(kind: ReportEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to send report event: {message}")]
    SendFailed { message: String },
    #[error("Report receiver lagged by {count} events")]
    Lagged { count: u64 },
    #[error("Failed to receive report event: {message}")]
    ReceiveFailed { message: String },
}

/// レポート境界。suite は example ごとの開始・終了イベントと
/// 失敗 (call site とメッセージ) をここへ流す。
#[async_trait]
pub trait Reporting: Send + Sync {
    async fn report(&self, event: ReportEvent) -> Result<(), ReportError>;
}

/// 構造化ログとして tracing に流す Reporter
#[derive(Debug, Default)]
pub struct TracingReporter;

#[async_trait]
impl Reporting for TracingReporter {
    async fn report(&self, event: ReportEvent) -> Result<(), ReportError> {
        match &event.kind {
            ReportEventKind::SuiteStarted { total } => info!(total, "suite started"),
            ReportEventKind::ExampleStarted { identifier } => {
                debug!(%identifier, "example started")
            }
            ReportEventKind::ExampleFinished { identifier, state } => {
                debug!(%identifier, %state, "example finished")
            }
            ReportEventKind::FailureReported { identifier, failure } => {
                warn!(%identifier, kind = %failure.kind, "{}", failure)
            }
            ReportEventKind::SuiteFinished { summary } => info!(
                total = summary.total,
                passed = summary.passed,
                failed = summary.failed,
                skipped = summary.skipped,
                "suite finished"
            ),
        }
        Ok(())
    }
}

/// テスト用: 受け取ったイベントをそのまま貯める
#[derive(Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().expect("reporter lock poisoned").clone()
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.events()
            .into_iter()
            .filter_map(|event| match event.kind {
                ReportEventKind::FailureReported { failure, .. } => Some(failure),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Reporting for CollectingReporter {
    async fn report(&self, event: ReportEvent) -> Result<(), ReportError> {
        self.events
            .lock()
            .expect("reporter lock poisoned")
            .push(event);
        Ok(())
    }
}

/// broadcast チャネルでホストランナーへ配信する Reporter
pub struct BroadcastReporter {
    sender: broadcast::Sender<ReportEvent>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> ReportReceiver {
        ReportReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

#[async_trait]
impl Reporting for BroadcastReporter {
    async fn report(&self, event: ReportEvent) -> Result<(), ReportError> {
        self.sender.send(event).map_err(|e| ReportError::SendFailed {
            message: e.to_string(),
        })?;
        Ok(())
    }
}

pub struct ReportReceiver {
    receiver: broadcast::Receiver<ReportEvent>,
}

impl ReportReceiver {
    /// イベントを受信する。Lagged の場合は resubscribe してエラーを返すので、
    /// 利用側はできるだけすぐに次の recv を呼ぶこと。
    pub async fn recv(&mut self) -> Result<ReportEvent, ReportError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                self.receiver = self.receiver.resubscribe();
                Err(ReportError::Lagged { count })
            }
            Err(e) => Err(ReportError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}
