//! netmon 守护进程
//!
//! 负责把各组件装配成一个进程：读取配置、安装日志和指标导出、
//! 启动轮询/评估/通知/拓扑任务，并在收到信号后按顺序关闭。

pub mod app;
pub mod logging;
pub mod metrics;
pub mod observer;
pub mod resources;
pub mod state;

pub use app::{Monitor, RunOptions};
