use crate::card::{shuffled_deck, Card, TOTAL_POINTS};
use crate::error::ActionError;
use crate::message::{GameRecord, RecordStatus};
use crate::state::{GameMode, GamePhase, GameState, PlayedCard, MAX_PLAYERS};
use rand::Rng;

// --- 核心游戏流程函数 ---
//
// 引擎只做状态变换，所有节奏控制（亮牌停顿、清桌停顿、下一局延时）
// 都由上层的服务端定时任务负责。每个函数都假定调用方持有该大厅状态的
// 独占访问权（服务端用锁保证）。

/// 出牌后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// 首攻落桌，行动权翻转给对手
    TurnPassed,
    /// 第二张也落桌了，进入结算阶段
    TrickReady,
}

/// 一墩的结算结果
#[derive(Debug, Clone)]
pub struct TrickOutcome {
    pub winner: String,
    pub points: u32,
    pub cards: [PlayedCard; 2],
}

/// 摸牌阶段的结果。摸到的牌属于手牌隐私，
/// 上层只能把 `winner_card` 发给胜者、`loser_card` 发给败者。
#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub winner: String,
    pub loser: String,
    pub winner_card: Card,
    pub loser_card: Option<Card>,
    pub stock_count: usize,
}

/// 一局（或整场比赛）的终局摘要
#[derive(Debug, Clone)]
pub struct GameSummary {
    /// 胜者昵称；平局为 None
    pub winner: Option<String>,
    /// 本局为胜者赢得的 marks 数（单局模式下只用于播报）
    pub marks_awarded: u8,
    /// 是否有人 marks 累计到 4，比赛就此结束
    pub match_over: bool,
}

/// 发牌，开始新的一局。
///
/// - 洗一副新牌，按变体给双方各发 3 或 9 张，剩余成为牌堆。
/// - 王牌 = 牌堆最底那张（最后被摸走），花色整局有效。
/// - 第一局随机选庄家，之后逐局轮换；庄家的对手先出牌。
/// - marks 跨局保留，其余计分状态全部重置。
pub fn deal(state: &mut GameState) -> Result<(), ActionError> {
    if state.players.len() < MAX_PLAYERS {
        return Err(ActionError::NotEnoughPlayers);
    }
    if matches!(state.phase, GamePhase::AwaitingPlay | GamePhase::ResolvingTrick) {
        return Err(ActionError::GameInProgress);
    }

    // 庄家轮换
    let dealer = match &state.dealer {
        None => {
            let idx = usize::from(rand::rng().random_bool(0.5));
            state.players[idx].identity.clone()
        }
        Some(prev) => state
            .opponent_of(prev)
            .map(|p| p.identity.clone())
            .ok_or(ActionError::PlayerNotFound)?,
    };

    let mut deck = shuffled_deck();
    let hand_size = state.variant.hand_size();

    for player in state.players.iter_mut() {
        player.hand = deck.drain(..hand_size).collect();
        player.captured.clear();
        player.points = 0;
    }

    // 牌堆从前端被摸走，底牌（back）最后离开
    state.stock = deck.into_iter().collect();
    state.trump = state.stock.back().copied();
    state.trump_suit = state.trump.map(|c| c.suit);

    state.board.clear();
    state.last_trick_winner = None;
    let leader = state
        .opponent_of(&dealer)
        .map(|p| p.identity.clone())
        .ok_or(ActionError::PlayerNotFound)?;
    state.turn = Some(leader);
    state.dealer = Some(dealer);
    state.phase = GamePhase::AwaitingPlay;
    state.game_started = true;
    Ok(())
}

/// 处理一次出牌。
///
/// 校验顺序：对局在进行 → 玩家在座 → 轮到他 → 下标合法 → 跟牌义务。
/// 跟牌义务只在牌堆摸空后生效：首攻已落桌、手里有同花色、却出了别的
/// 花色，才算违规；牌堆未空时任何牌都合法。
pub fn play_card(
    state: &mut GameState,
    identity: &str,
    card_index: usize,
) -> Result<PlayOutcome, ActionError> {
    if !state.game_started
        || matches!(
            state.phase,
            GamePhase::WaitingForPlayers | GamePhase::GameOver | GamePhase::MatchOver
        )
    {
        return Err(ActionError::GameNotStarted);
    }

    let player_idx = state
        .player_index(identity)
        .ok_or(ActionError::PlayerNotFound)?;

    // 结算期间 turn 为 None，任何人出牌都会落到这里
    if state.turn.as_deref() != Some(identity) {
        return Err(ActionError::NotYourTurn);
    }

    let hand = &state.players[player_idx].hand;
    if card_index >= hand.len() {
        return Err(ActionError::InvalidCard);
    }

    if state.stock.is_empty() {
        if let Some(led) = state.board.first() {
            let chosen = hand[card_index];
            if chosen.suit != led.card.suit && hand.iter().any(|c| c.suit == led.card.suit) {
                return Err(ActionError::MustFollowSuit);
            }
        }
    }

    let card = state.players[player_idx].hand.remove(card_index);
    state.board.push(PlayedCard {
        card,
        played_by: identity.to_string(),
    });

    if state.board.len() < 2 {
        let next = state
            .opponent_of(identity)
            .map(|p| p.identity.clone())
            .ok_or(ActionError::PlayerNotFound)?;
        state.turn = Some(next);
        Ok(PlayOutcome::TurnPassed)
    } else {
        state.turn = None;
        state.phase = GamePhase::ResolvingTrick;
        Ok(PlayOutcome::TrickReady)
    }
}

/// 结算当前一墩。桌面不足两张时返回 None。
///
/// 胜负判定：
/// (a) 同花色 → 牌力高者胜；
/// (b) 否则谁是王牌花色谁胜；
/// (c) 都不是王牌 → 首攻胜（后手既跟不上花色也没有王牌，无力争夺）。
///
/// 胜者吃下两张牌的分值，成为 `last_trick_winner` 并获得下一墩的行动权。
pub fn resolve_trick(state: &mut GameState) -> Option<TrickOutcome> {
    if state.board.len() < 2 {
        return None;
    }
    let second = state.board.pop()?;
    let first = state.board.pop()?;

    let first_wins = if first.card.suit == second.card.suit {
        first.card.rank > second.card.rank
    } else if state.trump_suit == Some(first.card.suit) {
        true
    } else if state.trump_suit == Some(second.card.suit) {
        false
    } else {
        true
    };

    let winner_identity = if first_wins {
        first.played_by.clone()
    } else {
        second.played_by.clone()
    };

    let points = first.card.points() + second.card.points();
    {
        let winner = state.player_mut(&winner_identity)?;
        winner.points += points;
        winner.captured.push(first.card);
        winner.captured.push(second.card);
    }
    state.last_trick_winner = Some(winner_identity.clone());
    state.turn = Some(winner_identity.clone());

    Some(TrickOutcome {
        winner: winner_identity,
        points,
        cards: [first, second],
    })
}

/// 摸牌阶段：牌堆非空时双方各摸一张，墩胜者先摸。
/// 牌堆被摸空的那一刻，王牌清为 None（牌本身已进了某人手里，
/// 不再是桌面上的活牌；花色仍保留在 `trump_suit` 里决定比牌）。
/// 牌堆本就为空时直接返回 None，跳过摸牌。
pub fn draw_cards(state: &mut GameState) -> Option<DrawOutcome> {
    if state.stock.is_empty() {
        return None;
    }
    let winner = state.last_trick_winner.clone()?;
    let loser = state.opponent_of(&winner)?.identity.clone();

    let winner_card = state.stock.pop_front()?;
    state.player_mut(&winner)?.hand.push(winner_card);

    let loser_card = state.stock.pop_front();
    if let Some(card) = loser_card {
        state.player_mut(&loser)?.hand.push(card);
    }

    if state.stock.is_empty() {
        state.trump = None;
    }

    Some(DrawOutcome {
        winner,
        loser,
        winner_card,
        loser_card,
        stock_count: state.stock.len(),
    })
}

/// 终局检查，在每墩结算与摸牌之后调用。
///
/// - 任何玩家得分 >= 120 → 立即获胜（Bandeira）；
/// - 双方手牌与牌堆同时摸空 → 得分高者胜，持平为平局；
/// - 否则对局继续，阶段回到 AwaitingPlay（行动权已在结算时给了墩胜者）。
///
/// 比赛模式下同时结算 marks：>=120 → 4（直接赢下整场），
/// 91-119 → 2（Capote），61-90 → 1（Risca），平局不计。
pub fn check_game_end(state: &mut GameState) -> Option<GameSummary> {
    if state.players.len() < MAX_PLAYERS {
        return None;
    }

    let bandeira = state.players.iter().position(|p| p.points >= TOTAL_POINTS);
    let exhausted =
        state.stock.is_empty() && state.players.iter().all(|p| p.hand.is_empty());

    if bandeira.is_none() && !exhausted {
        state.phase = GamePhase::AwaitingPlay;
        return None;
    }

    let winner_idx = match bandeira {
        Some(idx) => Some(idx),
        None => {
            let (p0, p1) = (state.players[0].points, state.players[1].points);
            if p0 == p1 {
                None
            } else if p0 > p1 {
                Some(0)
            } else {
                Some(1)
            }
        }
    };

    state.phase = GamePhase::GameOver;
    state.turn = None;
    state.game_started = false;

    let (winner, marks_awarded) = match winner_idx {
        None => (None, 0),
        Some(idx) => {
            let player = &state.players[idx];
            (Some(player.identity.clone()), marks_for_points(player.points))
        }
    };

    let mut match_over = false;
    if state.mode == GameMode::Match {
        if let Some(idx) = winner_idx {
            let player = &mut state.players[idx];
            player.marks = (player.marks + marks_awarded).min(4);
            if player.marks >= 4 {
                match_over = true;
                state.phase = GamePhase::MatchOver;
            }
        }
    }

    Some(GameSummary {
        winner,
        marks_awarded,
        match_over,
    })
}

/// 得分到 marks 的映射
pub fn marks_for_points(points: u32) -> u8 {
    match points {
        p if p >= 120 => 4, // Bandeira
        91..=119 => 2,      // Capote
        61..=90 => 1,       // Risca
        _ => 0,
    }
}

/// 为外部存储服务生成记录。两人都不在座时（不应发生）返回 None。
pub fn build_record(
    state: &GameState,
    status: RecordStatus,
    winner: Option<&str>,
) -> Option<GameRecord> {
    let [p1, p2] = state.players.as_slice() else {
        return None;
    };
    Some(GameRecord {
        variant: state.variant,
        mode: state.mode,
        status,
        player1: p1.identity.clone(),
        player2: p2.identity.clone(),
        player1_user_id: p1.external_user_id,
        player2_user_id: p2.external_user_id,
        player1_points: p1.points,
        player2_points: p2.points,
        player1_marks: p1.marks,
        player2_marks: p2.marks,
        winner: winner.map(str::to_string),
        stake: state.stake,
    })
}

// --- 单元测试 ---
