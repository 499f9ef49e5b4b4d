use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::session::SessionStore;
use crate::services::token_store::TokenStore;

/// 期限切れのトークンとセッションを定期的に削除するタスクを起動
pub fn spawn_sweeper(
    tokens: Arc<TokenStore>,
    sessions: Arc<SessionStore>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 初回 tick は即時に完了する
        interval.tick().await;

        loop {
            interval.tick().await;
            let now = OffsetDateTime::now_utc();
            tokens.sweep(now);
            sessions.sweep(now);
        }
    })
}
