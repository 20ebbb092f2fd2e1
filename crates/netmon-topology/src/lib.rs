//! 拓扑映射
//!
//! 周期性地通过适配器读取 L2（ARP、网桥转发表）和 L3（路由）信息，
//! 构建候选邻接图并与上一版快照求差，发布新的版本化快照。

pub mod diff;
pub mod graph;
pub mod mapper;
pub mod view;

pub use diff::{apply_round, DiscoveryRound, TopologyChange, TopologyDiff};
pub use graph::{EdgeKey, LinkType, TopologyEdge, TopologySnapshot};
pub use mapper::{build_round, MapperSettings, TopologyListener, TopologyMapper};
pub use view::TopologyView;
