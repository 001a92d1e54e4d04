use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as P_Mutex;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use bisca_core::{
    ConnectionId, GameRecord, GameState, LobbyId, LobbySummary, ServerMessage, MAX_PLAYERS,
};

// --- 节奏与宽限期 ---
// 都是调度出去的定时任务，绝不阻塞别的大厅。

/// 两张牌都亮在桌上之后，停顿多久再公布墩的归属
pub const TRICK_REVEAL_DELAY: Duration = Duration::from_millis(800);
/// 比赛模式下一局结束后，自动开下一局前的停顿
pub const NEXT_GAME_DELAY: Duration = Duration::from_secs(3);
/// 掉线玩家的重连宽限期
pub const RECONNECT_GRACE: Duration = Duration::from_secs(30);

/// 服务器全局状态
pub struct AppState {
    /// 大厅注册表。结构性变更（建 / 删 / 入座）都经由这里串行化。
    pub lobbies: DashMap<LobbyId, Arc<Lobby>>,
    /// 所有在线连接，大厅列表变动时全量广播用
    pub connections: DashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    /// 落库记录的发送端（fire-and-forget）
    pub records: mpsc::UnboundedSender<GameRecord>,
    /// 掉线玩家的重连宽限期（生产环境取 RECONNECT_GRACE）
    pub grace_period: Duration,
}

pub type SharedState = Arc<AppState>;

/// 单个大厅。
/// 重要‼️：严格规定使用锁的顺序，避免死锁：
/// members -> game_state -> timers
/// （game_state 的守卫不能跨 await 持有，广播前必须先释放）
pub struct Lobby {
    pub game_state: P_Mutex<GameState>,
    /// 昵称 -> 当前绑定的网络连接
    pub members: RwLock<HashMap<String, PlayerConnection>>,
    /// 本大厅挂起的全部定时任务，解散时统一取消
    pub timers: P_Mutex<LobbyTimers>,
}

/// 玩家的网络连接信息
pub struct PlayerConnection {
    pub connection_id: ConnectionId,
    /// 向该玩家的 WebSocket 写任务发送消息的通道
    pub sender: mpsc::Sender<ServerMessage>,
}

/// 大厅持有的可取消定时任务
#[derive(Default)]
pub struct LobbyTimers {
    /// 节奏任务（墩结算亮牌 / 下一局开始），同一时刻至多一个
    pub pacing: Option<JoinHandle<()>>,
    /// 每个掉线玩家一个的宽限期任务
    pub grace: HashMap<String, JoinHandle<()>>,
}

impl Lobby {
    pub fn new(game_state: GameState) -> Lobby {
        Lobby {
            game_state: P_Mutex::new(game_state),
            members: RwLock::new(HashMap::new()),
            timers: P_Mutex::new(LobbyTimers::default()),
        }
    }

    /// 向大厅内所有成员广播消息
    pub async fn broadcast(&self, message: &ServerMessage, exclude: Option<&str>) {
        for (identity, conn) in self.members.read().await.iter() {
            if Some(identity.as_str()) == exclude {
                continue;
            }
            if conn.sender.send(message.clone()).await.is_err() {
                // 发送失败说明对方也断开了，由其自己的 socket 任务善后
                warn!("向玩家 {} 发送消息失败（可能已断开）", identity);
            }
        }
    }

    /// 私发给某一名成员
    pub async fn send_to(&self, identity: &str, message: ServerMessage) {
        if let Some(conn) = self.members.read().await.get(identity) {
            let _ = conn.sender.send(message).await;
        }
    }

    /// 取消某玩家的宽限期任务（成功重连时调用）
    pub fn cancel_grace(&self, identity: &str) {
        if let Some(handle) = self.timers.lock().grace.remove(identity) {
            handle.abort();
        }
    }

    /// 取消本大厅的全部定时任务。解散时调用，
    /// 保证不会有过期回调打进已被释放的状态里。
    pub fn abort_timers(&self) {
        let mut timers = self.timers.lock();
        if let Some(handle) = timers.pacing.take() {
            handle.abort();
        }
        for (_, handle) in timers.grace.drain() {
            handle.abort();
        }
    }
}

/// 定时任务在苏醒后必须先调用这个：确认自己所属的大厅还挂在注册表上，
/// 而且没有被同名的新大厅顶替。不满足就直接放弃，什么都不碰。
pub fn is_current(state: &AppState, lobby_id: &str, lobby: &Arc<Lobby>) -> bool {
    state
        .lobbies
        .get(lobby_id)
        .map(|current| Arc::ptr_eq(current.value(), lobby))
        .unwrap_or(false)
}

// --- 大厅列表 ---

/// 生成大厅浏览列表
pub fn lobby_summaries(state: &AppState) -> Vec<LobbySummary> {
    state
        .lobbies
        .iter()
        .map(|entry| {
            let gs = entry.value().game_state.lock();
            LobbySummary {
                id: entry.key().clone(),
                player_count: gs.players.len(),
                max_players: MAX_PLAYERS,
                is_full: gs.is_full(),
                game_started: gs.game_started,
                mode: gs.mode,
                creator: gs
                    .players
                    .iter()
                    .find(|p| p.is_creator)
                    .map(|p| p.identity.clone()),
                players: gs.players.iter().map(|p| p.identity.clone()).collect(),
            }
        })
        .collect()
}

/// 大厅列表有任何变动时，推给所有在线连接（不只是大厅成员）
pub async fn broadcast_lobby_list(state: &SharedState) {
    let msg = ServerMessage::LobbyListUpdated {
        lobbies: lobby_summaries(state),
    };
    for entry in state.connections.iter() {
        let _ = entry.value().send(msg.clone()).await;
    }
}

/// 某个昵称是否已经坐在某个大厅里（查重连目标之外的所有大厅）
pub fn identity_seated_elsewhere(state: &AppState, identity: &str, except: &str) -> bool {
    state.lobbies.iter().any(|entry| {
        entry.key() != except
            && entry
                .value()
                .game_state
                .lock()
                .player(identity)
                .is_some()
    })
}

/// 解散大厅：摘下注册表、取消全部定时任务、通知所有成员。
pub async fn dismantle_lobby(state: &SharedState, lobby_id: &str, reason: &str) {
    let Some((_, lobby)) = state.lobbies.remove(lobby_id) else {
        return;
    };
    lobby.abort_timers();
    lobby
        .broadcast(
            &ServerMessage::LobbyDismantled {
                reason: reason.to_string(),
            },
            None,
        )
        .await;
    lobby.members.write().await.clear();
    info!("大厅 {} 已解散：{}", lobby_id, reason);
    broadcast_lobby_list(state).await;
}

// --- 单元测试 ---
