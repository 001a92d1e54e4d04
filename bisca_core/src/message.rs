use crate::card::Card;
use crate::error::ActionError;
use crate::state::{GameMode, GameState, LobbyId, PlayedCard, PlayerPublic, Variant};
use serde::{Deserialize, Serialize};

// --- 客户端 -> 服务器 的消息 ---
// 所有入站事件的封闭集合，在网关边界反序列化并校验。
// 携带的 nickname 必须与连接绑定的身份一致，否则按 PlayerNotFound 拒绝。

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ClientMessage {
    // --- 大厅管理消息 ---
    /// 请求当前的大厅列表（连接建立时服务器也会主动推一次）
    ListLobbies,
    /// 加入（或隐式创建）一个大厅。
    /// 若该大厅里有一个同昵称的掉线玩家，则按断线重连处理。
    JoinLobby {
        lobby_id: LobbyId,
        nickname: String,
        mode: GameMode,
        variant: Variant,
    },
    /// 主动离开大厅
    LeaveLobby { lobby_id: LobbyId, nickname: String },

    // --- 游戏内消息 ---
    /// 房主开始新对局（单局结束后也可再开）
    StartGame {
        lobby_id: LobbyId,
        variant: Variant,
        stake: Option<u32>,
    },
    /// 轮到自己时出一张手牌（按手牌下标）
    PlayCard {
        lobby_id: LobbyId,
        nickname: String,
        card_index: usize,
    },
    /// 绑定外部账号 id，仅用于赛后落库；不绑定也完全不影响游戏
    Authenticate {
        lobby_id: LobbyId,
        nickname: String,
        external_user_id: i64,
    },
}

// --- 服务器 -> 客户端 的消息 ---
// 私发消息（YourHand / CardsDrawn / 快照）只发给对应玩家本人，
// 其余广播给整个大厅；大厅列表广播给所有在线连接。

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ServerMessage {
    // --- 大厅管理消息 ---
    /// 大厅列表有任何变动时广播给所有连接
    LobbyListUpdated { lobbies: Vec<LobbySummary> },
    /// 大厅内玩家列表变动（加入 / 离开 / 掉线 / 重连）
    PlayerListUpdated { players: Vec<PlayerPublic> },
    /// 加入成功后私发给本人的确认。
    /// 重连时（is_reconnect = true）携带的净化状态就是全量快照，
    /// 客户端据此直接重建画面，无需回放历史。
    LobbyJoined {
        lobby_id: LobbyId,
        is_reconnect: bool,
        game_state: GameState,
    },

    // --- 对局消息 ---
    /// 新对局开始（王牌是公开信息）
    GameStarted {
        trump: Option<Card>,
        turn: String,
        variant: Variant,
        players: Vec<PlayerPublic>,
    },
    /// 私发：你的完整手牌。绝不携带他人手牌。
    YourHand { hand: Vec<Card> },
    /// 公共桌面状态
    StateUpdated {
        board: Vec<PlayedCard>,
        turn: Option<String>,
        trump: Option<Card>,
        last_trick_winner: Option<String>,
        stock_count: usize,
        players: Vec<PlayerPublic>,
    },
    /// 一墩结算完毕
    TrickResolved {
        winner: String,
        points: u32,
        cards: [PlayedCard; 2],
    },
    /// 私发：你这次摸到的牌。摸牌发生在牌堆非空的每墩之后，胜者先摸。
    CardsDrawn {
        card: Option<Card>,
        stock_count: usize,
    },
    /// 一局结束；winner 为 None 表示平局
    GameEnded {
        winner: Option<String>,
        players: Vec<PlayerPublic>,
    },
    /// 比赛结束（某玩家 marks 累计到 4）
    MatchEnded {
        winner: String,
        players: Vec<PlayerPublic>,
    },
    // --- 错误与通知 ---
    /// 动作被拒绝，只发给违规者本人
    ActionRejected { reason: ActionError },
    /// 大厅被解散（房主离开 / 游戏中有人退出等）
    LobbyDismantled { reason: String },
    /// 一般性通知（例如对手掉线、等待重连）
    Info { message: String },
}

/// 大厅浏览列表里的单项摘要
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LobbySummary {
    pub id: LobbyId,
    pub player_count: usize,
    pub max_players: usize,
    pub is_full: bool,
    pub game_started: bool,
    pub mode: GameMode,
    pub creator: Option<String>,
    pub players: Vec<String>,
}

// --- 落库记录 ---

/// 对局 / 比赛的最终状态，沿用外部存储服务的取值
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Ended,
    Interrupted,
}

/// 游戏结束时交给外部存储服务的记录。
/// 引擎只管发出（fire-and-forget），绝不等待确认。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GameRecord {
    pub variant: Variant,
    pub mode: GameMode,
    pub status: RecordStatus,
    pub player1: String,
    pub player2: String,
    pub player1_user_id: Option<i64>,
    pub player2_user_id: Option<i64>,
    pub player1_points: u32,
    pub player2_points: u32,
    pub player1_marks: u8,
    pub player2_marks: u8,
    /// 胜者昵称；平局或中断时为 None
    pub winner: Option<String>,
    pub stake: Option<u32>,
}
