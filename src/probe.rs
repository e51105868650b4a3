use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// ポーリング間隔。固定値で、ユーザーからは設定できない。
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// 非同期検証のデフォルトタイムアウト
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Satisfied,
    TimedOut,
}

/// 期待が満たされるまで一定間隔で評価を繰り返す。最初の評価は即時。
/// 満たされれば即 resolve し、期限が先に来たら timeout。
/// 現在のタスク上で待つため、待機中は suite の他の example は一切進まない。
pub(crate) async fn run_probe<F>(mut check: F, timeout: Duration) -> ProbeOutcome
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return ProbeOutcome::Satisfied;
        }
        let now = Instant::now();
        if now >= deadline {
            trace!(?timeout, "probe deadline elapsed");
            return ProbeOutcome::TimedOut;
        }
        sleep_until(deadline.min(now + PROBE_INTERVAL)).await;
    }
}
