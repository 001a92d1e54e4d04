use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use bisca_core::{
    check_game_end, deal, draw_cards, play_card, resolve_trick, ActionError, Card, ClientMessage,
    ConnectionId, GameMode, GamePhase, GameState, LobbyId, Player, PlayOutcome, RecordStatus,
    ServerMessage, Variant,
};

use crate::lobby::{
    broadcast_lobby_list, dismantle_lobby, identity_seated_elsewhere, is_current, lobby_summaries,
    Lobby, PlayerConnection, SharedState, NEXT_GAME_DELAY, TRICK_REVEAL_DELAY,
};
use crate::persist;

// --- 消息网关 ---
//
// 每条 WebSocket 连接的入站消息都从这里分发。
// 连接在成功加入大厅后绑定一个 (大厅, 昵称) 上下文，
// 之后所有带昵称的动作都必须与上下文一致，防止越权操纵他人座位。

/// 连接当前绑定的 (大厅, 昵称)。加入前为 None。
pub type ClientContext = Option<(LobbyId, String)>;

/// 分发一条客户端消息。`context` 由 socket 任务持有，跨消息存活。
pub async fn handle_client_message(
    msg: ClientMessage,
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    conn_id: ConnectionId,
    context: &mut ClientContext,
) {
    match msg {
        ClientMessage::ListLobbies => {
            let _ = tx
                .send(ServerMessage::LobbyListUpdated {
                    lobbies: lobby_summaries(state),
                })
                .await;
        }
        ClientMessage::JoinLobby {
            lobby_id,
            nickname,
            mode,
            variant,
        } => {
            join_lobby(state, tx, conn_id, context, lobby_id, nickname, mode, variant).await;
        }
        ClientMessage::LeaveLobby { lobby_id, nickname } => {
            leave_lobby(state, tx, context, lobby_id, nickname).await;
        }
        ClientMessage::StartGame {
            lobby_id,
            variant,
            stake,
        } => {
            start_game(state, tx, context, lobby_id, variant, stake).await;
        }
        ClientMessage::PlayCard {
            lobby_id,
            nickname,
            card_index,
        } => {
            play(state, tx, context, lobby_id, nickname, card_index).await;
        }
        ClientMessage::Authenticate {
            lobby_id,
            nickname,
            external_user_id,
        } => {
            authenticate(state, tx, context, lobby_id, nickname, external_user_id).await;
        }
    }
}

/// 私发一条拒绝消息给违规者本人，大厅状态不变
async fn reject(tx: &mpsc::Sender<ServerMessage>, reason: ActionError) {
    let _ = tx.send(ServerMessage::ActionRejected { reason }).await;
}

/// 校验动作里携带的 (大厅, 昵称) 与连接绑定的上下文一致。
/// 一致则返回绑定的昵称，否则给出应回给客户端的拒绝原因。
fn verify_context(
    context: &ClientContext,
    lobby_id: &str,
    nickname: &str,
) -> Result<String, ActionError> {
    match context {
        None => Err(ActionError::PlayerNotFound),
        Some((ctx_lobby, _)) if ctx_lobby != lobby_id => Err(ActionError::LobbyNotFound),
        Some((_, ctx_identity)) if ctx_identity != nickname => Err(ActionError::PlayerNotFound),
        Some((_, ctx_identity)) => Ok(ctx_identity.clone()),
    }
}

/// 公共桌面状态的广播消息（所有人可见的信息，不含任何手牌）
fn state_updated_msg(gs: &GameState) -> ServerMessage {
    ServerMessage::StateUpdated {
        board: gs.board.clone(),
        turn: gs.turn.clone(),
        trump: gs.trump,
        last_trick_winner: gs.last_trick_winner.clone(),
        stock_count: gs.stock.len(),
        players: gs.public_players(),
    }
}

/// 把双方各自的手牌私发给本人
async fn send_hands(lobby: &Lobby) {
    let hands: Vec<(String, Vec<Card>)> = {
        let gs = lobby.game_state.lock();
        gs.players
            .iter()
            .map(|p| (p.identity.clone(), p.hand.clone()))
            .collect()
    };
    for (identity, hand) in hands {
        lobby.send_to(&identity, ServerMessage::YourHand { hand }).await;
    }
}

// --- 加入 / 离开 ---

#[allow(clippy::too_many_arguments)]
async fn join_lobby(
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    conn_id: ConnectionId,
    context: &mut ClientContext,
    lobby_id: LobbyId,
    nickname: String,
    mode: GameMode,
    variant: Variant,
) {
    if context.is_some() {
        reject(tx, ActionError::AlreadyInLobby).await;
        return;
    }
    // 同一昵称不允许同时坐在两个大厅里
    if identity_seated_elsewhere(state, &nickname, &lobby_id) {
        reject(tx, ActionError::AlreadyInLobby).await;
        return;
    }

    // 大厅不存在则按请求参数隐式创建；已存在时沿用创建者定下的模式
    let lobby = state
        .lobbies
        .entry(lobby_id.clone())
        .or_insert_with(|| {
            Arc::new(Lobby::new(GameState::new(lobby_id.clone(), mode, variant)))
        })
        .value()
        .clone();

    let mut members = lobby.members.write().await;
    let seated = {
        let mut gs = lobby.game_state.lock();
        let existing = match gs.player_mut(&nickname) {
            Some(player) if player.connected => Some(Err(ActionError::AlreadyInLobby)),
            Some(player) => {
                // 断线重连：重新绑定连接，状态原样保留
                player.connected = true;
                player.connection_id = conn_id;
                player.last_seen_at = None;
                Some(Ok(true))
            }
            None => None,
        };
        let verdict = match existing {
            Some(verdict) => verdict,
            None if gs.game_started => Err(ActionError::GameInProgress),
            None if gs.is_full() => Err(ActionError::LobbyFull),
            None => {
                let is_creator = gs.players.is_empty();
                gs.players
                    .push(Player::new(nickname.clone(), conn_id, is_creator));
                Ok(false)
            }
        };
        verdict.map(|is_reconnect| (is_reconnect, gs.for_client(&nickname), gs.public_players()))
    };

    match seated {
        Err(reason) => {
            drop(members);
            reject(tx, reason).await;
        }
        Ok((is_reconnect, snapshot, publics)) => {
            members.insert(
                nickname.clone(),
                PlayerConnection {
                    connection_id: conn_id,
                    sender: tx.clone(),
                },
            );
            drop(members);

            if is_reconnect {
                lobby.cancel_grace(&nickname);
                info!("玩家 {} 重连回大厅 {}", nickname, lobby_id);
            } else {
                info!("玩家 {} 加入大厅 {}", nickname, lobby_id);
            }

            *context = Some((lobby_id.clone(), nickname.clone()));
            let _ = tx
                .send(ServerMessage::LobbyJoined {
                    lobby_id,
                    is_reconnect,
                    game_state: snapshot,
                })
                .await;
            if is_reconnect {
                // 快照里只有净化数据，手牌再补一份私发
                let hand = lobby
                    .game_state
                    .lock()
                    .player(&nickname)
                    .map(|p| p.hand.clone())
                    .unwrap_or_default();
                let _ = tx.send(ServerMessage::YourHand { hand }).await;
                lobby
                    .broadcast(
                        &ServerMessage::Info {
                            message: format!("{} 重新连接", nickname),
                        },
                        Some(&nickname),
                    )
                    .await;
            }
            lobby
                .broadcast(&ServerMessage::PlayerListUpdated { players: publics }, None)
                .await;
            broadcast_lobby_list(state).await;
        }
    }
}

async fn leave_lobby(
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    context: &mut ClientContext,
    lobby_id: LobbyId,
    nickname: String,
) {
    let identity = match verify_context(context, &lobby_id, &nickname) {
        Ok(identity) => identity,
        Err(reason) => {
            reject(tx, reason).await;
            return;
        }
    };
    let Some(lobby) = state.lobbies.get(&lobby_id).map(|e| e.value().clone()) else {
        *context = None;
        reject(tx, ActionError::LobbyNotFound).await;
        return;
    };

    let seat = {
        let gs = lobby.game_state.lock();
        gs.player(&identity).map(|player| {
            (
                matches!(gs.phase, GamePhase::AwaitingPlay | GamePhase::ResolvingTrick),
                player.is_creator,
            )
        })
    };
    let Some((in_progress, is_creator)) = seat else {
        reject(tx, ActionError::PlayerNotFound).await;
        return;
    };

    // 离开者无论如何都算退出了
    *context = None;
    lobby.members.write().await.remove(&identity);
    info!("玩家 {} 离开大厅 {}", identity, lobby_id);

    if in_progress {
        // 游戏进行中有人退出，对局作废并记为中断
        emit_interrupted(state, &lobby);
        dismantle_lobby(state, &lobby_id, &format!("{identity} 离开了对局")).await;
    } else if is_creator {
        dismantle_lobby(state, &lobby_id, "房主离开了大厅").await;
    } else {
        let publics = {
            let mut gs = lobby.game_state.lock();
            if let Some(idx) = gs.player_index(&identity) {
                gs.players.remove(idx);
            }
            if gs.players.is_empty() {
                None
            } else {
                Some(gs.public_players())
            }
        };
        match publics {
            None => {
                state.lobbies.remove(&lobby_id);
                lobby.abort_timers();
            }
            Some(players) => {
                lobby
                    .broadcast(&ServerMessage::PlayerListUpdated { players }, None)
                    .await;
            }
        }
        broadcast_lobby_list(state).await;
    }
}

// --- 游戏动作 ---

async fn start_game(
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    context: &ClientContext,
    lobby_id: LobbyId,
    variant: Variant,
    stake: Option<u32>,
) {
    let Some((ctx_lobby, identity)) = context.as_ref() else {
        reject(tx, ActionError::PlayerNotFound).await;
        return;
    };
    if ctx_lobby != &lobby_id {
        reject(tx, ActionError::LobbyNotFound).await;
        return;
    }
    let Some(lobby) = state.lobbies.get(&lobby_id).map(|e| e.value().clone()) else {
        reject(tx, ActionError::LobbyNotFound).await;
        return;
    };

    let dealt = {
        let mut gs = lobby.game_state.lock();
        let is_creator = gs.player(identity).map(|p| p.is_creator).unwrap_or(false);
        if !is_creator {
            Err(ActionError::NotCreator)
        } else {
            // 被拒绝的动作不得留下任何状态变更，失败时恢复原值
            let (prev_variant, prev_stake) = (gs.variant, gs.stake);
            gs.variant = variant;
            gs.stake = stake;
            match deal(&mut gs) {
                Ok(()) => Ok(ServerMessage::GameStarted {
                    trump: gs.trump,
                    turn: gs.turn.clone().unwrap_or_default(),
                    variant: gs.variant,
                    players: gs.public_players(),
                }),
                Err(reason) => {
                    gs.variant = prev_variant;
                    gs.stake = prev_stake;
                    Err(reason)
                }
            }
        }
    };

    match dealt {
        Err(reason) => reject(tx, reason).await,
        Ok(started) => {
            info!("大厅 {} 开始新对局", lobby_id);
            lobby.broadcast(&started, None).await;
            send_hands(&lobby).await;
            broadcast_lobby_list(state).await;
        }
    }
}

async fn play(
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    context: &ClientContext,
    lobby_id: LobbyId,
    nickname: String,
    card_index: usize,
) {
    let identity = match verify_context(context, &lobby_id, &nickname) {
        Ok(identity) => identity,
        Err(reason) => {
            reject(tx, reason).await;
            return;
        }
    };
    let Some(lobby) = state.lobbies.get(&lobby_id).map(|e| e.value().clone()) else {
        reject(tx, ActionError::LobbyNotFound).await;
        return;
    };

    let outcome = {
        let mut gs = lobby.game_state.lock();
        play_card(&mut gs, &identity, card_index).map(|o| (o, state_updated_msg(&gs)))
    };

    match outcome {
        Err(reason) => reject(tx, reason).await,
        Ok((PlayOutcome::TurnPassed, update)) => {
            lobby.broadcast(&update, None).await;
        }
        Ok((PlayOutcome::TrickReady, update)) => {
            // 两张牌先亮一会儿再公布归属，由节奏任务接管
            lobby.broadcast(&update, None).await;
            schedule_trick_resolution(state.clone(), lobby_id, lobby);
        }
    }
}

async fn authenticate(
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    context: &ClientContext,
    lobby_id: LobbyId,
    nickname: String,
    external_user_id: i64,
) {
    let identity = match verify_context(context, &lobby_id, &nickname) {
        Ok(identity) => identity,
        Err(reason) => {
            reject(tx, reason).await;
            return;
        }
    };
    let Some(lobby) = state.lobbies.get(&lobby_id).map(|e| e.value().clone()) else {
        reject(tx, ActionError::LobbyNotFound).await;
        return;
    };

    let bound = {
        let mut gs = lobby.game_state.lock();
        match gs.player_mut(&identity) {
            Some(player) => {
                player.external_user_id = Some(external_user_id);
                true
            }
            None => false,
        }
    };
    if bound {
        info!("玩家 {} 绑定外部账号 {}", identity, external_user_id);
        let _ = tx
            .send(ServerMessage::Info {
                message: "账号绑定成功".into(),
            })
            .await;
    } else {
        reject(tx, ActionError::PlayerNotFound).await;
    }
}

// --- 节奏任务 ---
//
// 所有延时动作都作为可取消的 JoinHandle 挂在大厅上；
// 任务苏醒后先摘掉自己的句柄，再用 is_current 确认大厅没被解散或顶替，
// 不满足就直接放弃，保证过期回调绝不触碰新状态。

fn schedule_trick_resolution(state: SharedState, lobby_id: LobbyId, lobby: Arc<Lobby>) {
    let handle = tokio::spawn({
        let lobby = lobby.clone();
        async move {
            tokio::time::sleep(TRICK_REVEAL_DELAY).await;
            lobby.timers.lock().pacing.take();
            if !is_current(&state, &lobby_id, &lobby) {
                return;
            }
            resolve_and_continue(state, lobby_id, lobby).await;
        }
    });
    lobby.timers.lock().pacing = Some(handle);
}

/// 结算当前墩、摸牌、检查终局，并把各阶段消息发出去。
/// 这是唯一推进 ResolvingTrick 阶段的入口。
async fn resolve_and_continue(state: SharedState, lobby_id: LobbyId, lobby: Arc<Lobby>) {
    let resolved = {
        let mut gs = lobby.game_state.lock();
        resolve_trick(&mut gs).map(|trick| {
            // 结算后立即查一次终局：Bandeira（≥120）直接收局，不再摸牌
            let (draw, summary) = match check_game_end(&mut gs) {
                Some(summary) => (None, Some(summary)),
                None => {
                    let draw = draw_cards(&mut gs);
                    (draw, check_game_end(&mut gs))
                }
            };
            (trick, draw, summary, gs.public_players(), gs.mode)
        })
    };
    let Some((trick, draw, summary, publics, mode)) = resolved else {
        return;
    };

    lobby
        .broadcast(
            &ServerMessage::TrickResolved {
                winner: trick.winner.clone(),
                points: trick.points,
                cards: trick.cards,
            },
            None,
        )
        .await;

    if let Some(d) = draw {
        // 摸到的牌属于手牌隐私，各自只发给本人
        lobby
            .send_to(
                &d.winner,
                ServerMessage::CardsDrawn {
                    card: Some(d.winner_card),
                    stock_count: d.stock_count,
                },
            )
            .await;
        lobby
            .send_to(
                &d.loser,
                ServerMessage::CardsDrawn {
                    card: d.loser_card,
                    stock_count: d.stock_count,
                },
            )
            .await;
        send_hands(&lobby).await;
    }

    match summary {
        None => {
            let update = state_updated_msg(&lobby.game_state.lock());
            lobby.broadcast(&update, None).await;
        }
        Some(summary) => {
            // 先落库，再播报
            let record = {
                let gs = lobby.game_state.lock();
                bisca_core::build_record(&gs, RecordStatus::Ended, summary.winner.as_deref())
            };
            if let Some(record) = record {
                persist::emit(&state, record);
            }
            info!(
                "大厅 {} 一局结束，胜者 {:?}，得 {} marks",
                lobby_id, summary.winner, summary.marks_awarded
            );
            lobby
                .broadcast(
                    &ServerMessage::GameEnded {
                        winner: summary.winner.clone(),
                        players: publics.clone(),
                    },
                    None,
                )
                .await;

            if summary.match_over {
                if let Some(winner) = summary.winner {
                    info!("大厅 {} 比赛结束，冠军 {}", lobby_id, winner);
                    lobby
                        .broadcast(
                            &ServerMessage::MatchEnded {
                                winner,
                                players: publics,
                            },
                            None,
                        )
                        .await;
                }
            } else if mode == GameMode::Match {
                // 比赛模式下停顿片刻自动开下一局
                schedule_next_game(state.clone(), lobby_id, lobby.clone());
            }
            broadcast_lobby_list(&state).await;
        }
    }
}

fn schedule_next_game(state: SharedState, lobby_id: LobbyId, lobby: Arc<Lobby>) {
    let handle = tokio::spawn({
        let lobby = lobby.clone();
        async move {
            tokio::time::sleep(NEXT_GAME_DELAY).await;
            lobby.timers.lock().pacing.take();
            if !is_current(&state, &lobby_id, &lobby) {
                return;
            }
            let dealt = {
                let mut gs = lobby.game_state.lock();
                deal(&mut gs).map(|()| ServerMessage::GameStarted {
                    trump: gs.trump,
                    turn: gs.turn.clone().unwrap_or_default(),
                    variant: gs.variant,
                    players: gs.public_players(),
                })
            };
            match dealt {
                Err(e) => warn!("大厅 {} 自动开局失败：{}", lobby_id, e),
                Ok(started) => {
                    info!("大厅 {} 自动开始下一局", lobby_id);
                    lobby.broadcast(&started, None).await;
                    send_hands(&lobby).await;
                    broadcast_lobby_list(&state).await;
                }
            }
        }
    });
    lobby.timers.lock().pacing = Some(handle);
}

// --- 断线处理 ---

/// socket 任务结束时调用。
/// 只处理仍绑定在该连接上的座位：如果玩家已经用新连接重连，
/// 旧连接迟到的断开事件必须被忽略。
pub async fn handle_disconnect(
    state: &SharedState,
    lobby_id: &str,
    identity: &str,
    conn_id: ConnectionId,
) {
    let Some(lobby) = state.lobbies.get(lobby_id).map(|e| e.value().clone()) else {
        return;
    };

    {
        let mut members = lobby.members.write().await;
        match members.get(identity) {
            Some(conn) if conn.connection_id == conn_id => {
                members.remove(identity);
            }
            _ => return,
        }
    }

    let seat = {
        let mut gs = lobby.game_state.lock();
        let marked = match gs.player_mut(identity) {
            Some(player) => {
                player.connected = false;
                player.last_seen_at = Some(std::time::Instant::now());
                Some(player.is_creator)
            }
            None => None,
        };
        marked.map(|is_creator| (gs.game_started, is_creator, gs.public_players()))
    };
    let Some((game_started, is_creator, publics)) = seat else {
        return;
    };
    info!("玩家 {} 从大厅 {} 断开连接", identity, lobby_id);

    // 房主断线没有宽限期：无论开没开局，大厅立即解散
    if is_creator {
        emit_interrupted(state, &lobby);
        dismantle_lobby(state, lobby_id, "房主断开了连接").await;
        return;
    }

    if !game_started {
        // 未开局的普通成员掉线等同于离开
        let remaining = {
            let mut gs = lobby.game_state.lock();
            if let Some(idx) = gs.player_index(identity) {
                gs.players.remove(idx);
            }
            if gs.players.is_empty() {
                None
            } else {
                Some(gs.public_players())
            }
        };
        match remaining {
            None => {
                state.lobbies.remove(lobby_id);
                lobby.abort_timers();
            }
            Some(players) => {
                lobby
                    .broadcast(&ServerMessage::PlayerListUpdated { players }, None)
                    .await;
            }
        }
        broadcast_lobby_list(state).await;
        return;
    }

    // 游戏进行中：保留座位，开一个重连宽限期
    lobby
        .broadcast(
            &ServerMessage::Info {
                message: format!("{identity} 掉线，等待重连"),
            },
            None,
        )
        .await;
    lobby
        .broadcast(&ServerMessage::PlayerListUpdated { players: publics }, None)
        .await;
    spawn_grace_timer(state.clone(), lobby_id.to_string(), lobby, identity.to_string());
}

fn spawn_grace_timer(state: SharedState, lobby_id: LobbyId, lobby: Arc<Lobby>, identity: String) {
    let handle = tokio::spawn({
        let lobby = lobby.clone();
        let identity = identity.clone();
        async move {
            tokio::time::sleep(state.grace_period).await;
            lobby.timers.lock().grace.remove(&identity);
            if !is_current(&state, &lobby_id, &lobby) {
                return;
            }
            let still_gone = lobby
                .game_state
                .lock()
                .player(&identity)
                .map(|p| !p.connected)
                .unwrap_or(false);
            if !still_gone {
                return;
            }
            info!("玩家 {} 重连超时，解散大厅 {}", identity, lobby_id);
            emit_interrupted(&state, &lobby);
            dismantle_lobby(&state, &lobby_id, &format!("{identity} 重连超时")).await;
        }
    });
    lobby.timers.lock().grace.insert(identity, handle);
}

/// 对局还在进行时把当前局面记为中断落库
fn emit_interrupted(state: &SharedState, lobby: &Lobby) {
    let record = {
        let gs = lobby.game_state.lock();
        if matches!(gs.phase, GamePhase::AwaitingPlay | GamePhase::ResolvingTrick) {
            bisca_core::build_record(&gs, RecordStatus::Interrupted, None)
        } else {
            None
        }
    };
    if let Some(record) = record {
        persist::emit(state, record);
    }
}

// --- 单元测试 ---
