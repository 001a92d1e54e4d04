//! # Bisca 核心规则库
//!
//! 这个 `core` crate 包含 Bisca（葡萄牙式两人吃墩牌戏）的全部
//! 核心状态、规则引擎以及客户端-服务器通信消息的定义。
//! 它不依赖任何异步运行时或网络实现，所有节奏控制（亮牌停顿、
//! 重连宽限期等）都属于上层服务端的职责，使本库可以被任何
//! 上层应用（服务器、模拟器、测试）直接复用。

mod card;
mod error;
mod logic;
mod message;
mod state;

pub use card::*;

pub use error::*;

pub use logic::*;

pub use message::*;

pub use state::*;
