use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 动作被拒绝的原因，封闭集合。
/// 既是引擎函数的错误类型，也直接作为 `ActionRejected` 的 wire 负载，
/// 只回给违规的那名玩家，不做广播，会话状态保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ActionError {
    /// 协议违规：还没轮到该玩家行动
    #[error("not your turn")]
    NotYourTurn,
    /// 协议违规：手牌序号越界
    #[error("invalid card index")]
    InvalidCard,
    /// 协议违规：牌堆已空时必须跟随首攻花色
    #[error("must follow the led suit")]
    MustFollowSuit,
    /// 对局尚未开始
    #[error("game has not started")]
    GameNotStarted,
    /// 对局已在进行中（开局 / 非重连加入被拒）
    #[error("game already in progress")]
    GameInProgress,
    /// 大厅不存在
    #[error("lobby not found")]
    LobbyNotFound,
    /// 大厅已满员
    #[error("lobby is full")]
    LobbyFull,
    /// 玩家不在该大厅中
    #[error("player not found in this lobby")]
    PlayerNotFound,
    /// 该昵称已坐在别的大厅里
    #[error("identity already seated in another lobby")]
    AlreadyInLobby,
    /// 只有房主可以开始游戏
    #[error("only the lobby creator may start the game")]
    NotCreator,
    /// 人数不足，无法开始
    #[error("not enough players to start")]
    NotEnoughPlayers,
}
