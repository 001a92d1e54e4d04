use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use bisca_core::GameRecord;

use crate::lobby::AppState;

// --- 对局落库 ---
//
// 游戏引擎只负责在终局 / 中断时发出一条记录，落库本身完全异步，
// 永远不反向阻塞任何大厅的游戏流程。

/// 启动落库后台任务。
/// 返回的发送端挂在 `AppState` 上，整个进程共用一条通道。
pub fn spawn_record_sink() -> (mpsc::UnboundedSender<GameRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<GameRecord>();
    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            // TODO: 把记录 POST 到账号服务的 /games 接口；目前先落结构化日志
            match serde_json::to_string(&record) {
                Ok(json) => info!("对局落库：{}", json),
                Err(e) => error!("对局记录序列化失败：{}", e),
            }
        }
        info!("落库通道已关闭");
    });
    (tx, handle)
}

/// 发出一条落库记录（fire-and-forget）
pub fn emit(state: &AppState, record: GameRecord) {
    if state.records.send(record).is_err() {
        warn!("落库通道已关闭，记录被丢弃");
    }
}

// --- 单元测试 ---

#[cfg(test)]
mod tests {
    use super::*;
    use bisca_core::{GameMode, RecordStatus, Variant};

    fn sample_record() -> GameRecord {
        GameRecord {
            variant: Variant::Nine,
            mode: GameMode::Match,
            status: RecordStatus::Ended,
            player1: "ana".into(),
            player2: "rui".into(),
            player1_user_id: Some(7),
            player2_user_id: None,
            player1_points: 75,
            player2_points: 45,
            player1_marks: 1,
            player2_marks: 0,
            winner: Some("ana".into()),
            stake: Some(100),
        }
    }

    #[tokio::test]
    async fn test_sink_consumes_records() {
        let (tx, handle) = spawn_record_sink();
        tx.send(sample_record()).expect("通道应接受记录");
        // 关闭发送端后后台任务应自行退出
        drop(tx);
        handle.await.expect("落库任务应正常结束");
    }

    #[test]
    fn test_record_serializes_to_json() {
        let json = serde_json::to_string(&sample_record()).unwrap();
        assert!(json.contains("\"player1\":\"ana\""));
        assert!(json.contains("\"winner\":\"ana\""));
        assert!(json.contains("\"status\":\"Ended\""));
    }
}
