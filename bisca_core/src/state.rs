use crate::card::{Card, Suit};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use uuid::Uuid;

/// 大厅由玩家自选的名字标识（大厅浏览列表里展示的就是它）
pub type LobbyId = String;
/// 每条 WebSocket 连接的临时标识，重连后会换新
pub type ConnectionId = Uuid;

/// 一个大厅最多容纳的玩家数
pub const MAX_PLAYERS: usize = 2;

/// 游戏模式：单局游戏，或积 marks 的比赛（先到 4 个 marks 为胜）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    Single,
    Match,
}

/// 发牌变体：每人起手 3 张或 9 张。
/// 40 张牌发完两手后剩余部分成为牌堆（34 或 22 张）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    Three,
    Nine,
}

impl Variant {
    pub fn hand_size(self) -> usize {
        match self {
            Variant::Three => 3,
            Variant::Nine => 9,
        }
    }
}

/// 游戏阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    /// 等待第二名玩家加入 / 房主开始游戏
    WaitingForPlayers,
    /// 等待 `turn` 指向的玩家出牌
    AwaitingPlay,
    /// 两张牌都已打出，等待结算（此时 `turn` 为 None，谁都不能行动）
    ResolvingTrick,
    /// 一局结束（单局模式下房主可以再开一局）
    GameOver,
    /// 比赛结束（有玩家累计到 4 个 marks）
    MatchOver,
}

/// 打到桌面上的牌，记录是谁打的
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedCard {
    pub card: Card,
    pub played_by: String,
}

/// 大厅内的玩家
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// 稳定昵称，整个会话期间不变，也是断线重连的钥匙
    pub identity: String,
    /// 当前绑定的连接，重连时重新绑定。不发给客户端。
    #[serde(skip)]
    pub connection_id: ConnectionId,
    /// 通过 Authenticate 绑定的外部账号 id，只用于落库记录
    pub external_user_id: Option<i64>,
    /// 手牌。净化后的状态里只保留自己的手牌。
    pub hand: Vec<Card>,
    /// 赢到的墩（都是双方见过的牌，属于公开信息）
    pub captured: Vec<Card>,
    /// 本局累计的墩分，0-120
    pub points: u32,
    /// 比赛累计的 marks，0-4
    pub marks: u8,
    pub is_creator: bool,
    pub connected: bool,
    #[serde(skip)]
    pub last_seen_at: Option<Instant>,
}

impl Player {
    pub fn new(identity: String, connection_id: ConnectionId, is_creator: bool) -> Player {
        Player {
            identity,
            connection_id,
            external_user_id: None,
            hand: Vec::new(),
            captured: Vec::new(),
            points: 0,
            marks: 0,
            is_creator,
            connected: true,
            last_seen_at: None,
        }
    }
}

/// 玩家的公开视图：广播给整个大厅的内容，绝不包含手牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPublic {
    pub identity: String,
    pub points: u32,
    pub marks: u8,
    pub card_count: usize,
    pub connected: bool,
    pub is_creator: bool,
}

/// 一个大厅的完整游戏状态。
/// 服务端持有完整数据；发给客户端前必须经过 `for_client` 净化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub lobby_id: LobbyId,
    pub mode: GameMode,
    pub variant: Variant,
    /// 0-2 名玩家，加入顺序即座位顺序
    pub players: Vec<Player>,
    /// 本墩已打出的牌，0-2 张
    pub board: Vec<PlayedCard>,
    /// 牌堆（面朝下）。不序列化，客户端只能知道张数。
    #[serde(skip)]
    pub stock: VecDeque<Card>,
    /// 牌堆剩余张数。只在 `for_client` 的净化副本里填充。
    pub stock_count: usize,
    /// 王牌：发牌时牌堆最底、最后被摸走的那张。牌堆摸空后清为 None。
    pub trump: Option<Card>,
    /// 王牌花色。发牌时固定，即便 `trump` 被清空也继续决定比牌结果。
    pub trump_suit: Option<Suit>,
    /// 应当行动的玩家昵称；结算期间为 None
    pub turn: Option<String>,
    pub last_trick_winner: Option<String>,
    /// 本局庄家，局与局之间轮换。庄家的对手先出牌。
    pub dealer: Option<String>,
    pub phase: GamePhase,
    pub game_started: bool,
    /// 比赛模式下的赌注，只透传给落库记录
    pub stake: Option<u32>,
}

// --- GameState 的实现方法 ---

impl GameState {
    pub fn new(lobby_id: LobbyId, mode: GameMode, variant: Variant) -> GameState {
        GameState {
            lobby_id,
            mode,
            variant,
            players: Vec::new(),
            board: Vec::new(),
            stock: VecDeque::new(),
            stock_count: 0,
            trump: None,
            trump_suit: None,
            turn: None,
            last_trick_winner: None,
            dealer: None,
            phase: GamePhase::WaitingForPlayers,
            game_started: false,
            stake: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// 按昵称查找玩家在座位表中的下标
    pub fn player_index(&self, identity: &str) -> Option<usize> {
        self.players.iter().position(|p| p.identity == identity)
    }

    pub fn player(&self, identity: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.identity == identity)
    }

    pub fn player_mut(&mut self, identity: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.identity == identity)
    }

    /// 两人局里某玩家的对手
    pub fn opponent_of(&self, identity: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.identity != identity)
    }

    /// 生成广播用的公开玩家列表
    pub fn public_players(&self) -> Vec<PlayerPublic> {
        self.players
            .iter()
            .map(|p| PlayerPublic {
                identity: p.identity.clone(),
                points: p.points,
                marks: p.marks,
                card_count: p.hand.len(),
                connected: p.connected,
                is_creator: p.is_creator,
            })
            .collect()
    }

    /// 为指定客户端生成净化后的状态副本：
    /// 牌堆只保留张数，对手的手牌被清空。
    /// 这是手牌隐私不变量的唯一出口，所有发向客户端的快照都必须经过这里。
    pub fn for_client(&self, viewer: &str) -> GameState {
        let mut client_state = self.clone();
        client_state.stock_count = self.stock.len();
        client_state.stock.clear();

        for player in client_state.players.iter_mut() {
            if player.identity != viewer {
                player.hand.clear();
            }
        }

        client_state
    }
}

// --- 单元测试 ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Rank, Suit};

    fn two_player_state() -> GameState {
        let mut state = GameState::new("mesa".into(), GameMode::Single, Variant::Nine);
        state.players.push(Player::new("ana".into(), Uuid::new_v4(), true));
        state.players.push(Player::new("rui".into(), Uuid::new_v4(), false));
        state
    }

    #[test]
    fn test_for_client_hides_opponent_hand() {
        let mut state = two_player_state();
        state.players[0].hand.push(Card::new(Rank::Ace, Suit::Heart));
        state.players[1].hand.push(Card::new(Rank::Seven, Suit::Club));
        state.stock.push_back(Card::new(Rank::Two, Suit::Spade));

        let view = state.for_client("ana");

        // 自己的手牌保留，对手的被清空
        assert_eq!(view.player("ana").unwrap().hand.len(), 1);
        assert!(view.player("rui").unwrap().hand.is_empty());
        // 牌堆不下发，只给张数
        assert!(view.stock.is_empty());
        assert_eq!(view.stock_count, 1);
        // 但公开列表里对手的手牌张数仍然可见
        let publics = view.public_players();
        assert_eq!(publics.iter().find(|p| p.identity == "ana").unwrap().card_count, 1);
    }

    #[test]
    fn test_public_players_never_contain_cards() {
        let mut state = two_player_state();
        state.players[0].hand.push(Card::new(Rank::King, Suit::Diamond));

        let publics = state.public_players();
        assert_eq!(publics.len(), 2);
        assert_eq!(publics[0].card_count, 1);
        assert_eq!(publics[0].points, 0);
    }

    #[test]
    fn test_opponent_lookup() {
        let state = two_player_state();
        assert_eq!(state.opponent_of("ana").unwrap().identity, "rui");
        assert_eq!(state.opponent_of("rui").unwrap().identity, "ana");
        assert!(state.player("zé").is_none());
    }
}
