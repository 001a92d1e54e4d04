mod gateway;
mod lobby;
mod persist;

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use bisca_core::{ClientMessage, ServerMessage};

use crate::gateway::{handle_client_message, handle_disconnect, ClientContext};
use crate::lobby::{lobby_summaries, AppState, SharedState, RECONNECT_GRACE};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // 落库通道整个进程一条，后台任务伴随进程存活
    let (records, _record_task) = persist::spawn_record_sink();

    let state = SharedState::new(AppState {
        lobbies: DashMap::new(),
        connections: DashMap::new(),
        records,
        grace_period: RECONNECT_GRACE,
    });

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("服务器正在监听 {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await.unwrap(), app)
        .await
        .unwrap();
}

/// 处理 WebSocket 连接请求
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// 处理单个 WebSocket 连接的生命周期
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    // 创建一个 MPSC 通道，用于从其他任务接收要发送的消息
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    // 启动一个新任务，专门负责将 MPSC 通道中的消息发送到 WebSocket
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let payload = serde_json::to_string(&msg).unwrap();
            if sender.send(Message::Text(payload.into())).await.is_err() {
                // 发送失败，说明客户端已断开，退出任务
                break;
            }
        }
    });

    state.connections.insert(conn_id, tx.clone());
    info!("新连接 {}", conn_id);

    // 连接建立后先主动推一次大厅列表
    let _ = tx
        .send(ServerMessage::LobbyListUpdated {
            lobbies: lobby_summaries(&state),
        })
        .await;

    // 当前连接绑定的 (大厅, 昵称)，加入成功后填充
    let mut context: ClientContext = None;

    // 主循环，处理从客户端接收到的消息
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(client_msg, &state, &tx, conn_id, &mut context).await;
                }
                Err(e) => {
                    tracing::warn!("解析消息失败: {}", e);
                }
            }
        }
    }

    // 客户端断开连接，执行清理工作
    state.connections.remove(&conn_id);
    if let Some((lobby_id, identity)) = context {
        handle_disconnect(&state, &lobby_id, &identity, conn_id).await;
    }
    info!("客户端连接 {} 关闭", conn_id);
}
