//! # 混合仿真执行核心
//!
//! 在 [`crate::net`] 的结构之上推进标识状态: 弧求值 → 变迁行为 → 行为缓存
//! → 时钟/调度 → 控制器, 自底向上依赖. 调度语义:
//!
//! * Immediate 变迁对一切定时/随机/连续活动拥有绝对优先级, 同时可激发时
//!   按最小 id 发射 (可复现);
//! * Timed 变迁使能后等待固定延迟, 失能即重置 (无年龄记忆);
//! * Stochastic 变迁按指数分布抽取候选发射时刻, 多者竞争取最小
//!   (连续时间马尔可夫链的竞速语义), 速率变化即重抽;
//! * Continuous 变迁在离散事件之间按配置的数值方法积分.
//!
//! 标识单写者: 行为只读取标识并报告增量, 提交始终发生在
//! [`controller::SimulationController`] 中, 失败的步不产生部分变更.

pub mod arc_eval;
pub mod behavior;
pub mod cache;
pub mod controller;
pub mod ensemble;
pub mod error;
pub mod scheduler;
pub mod session;

pub use arc_eval::ArcSnapshot;
pub use behavior::{Behavior, BehaviorKind, Candidate, TimerState};
pub use cache::BehaviorCache;
pub use controller::{SimulationController, SimulationEvent, StepReport};
pub use ensemble::{Trajectory, run_ensemble, run_trajectory};
pub use error::SimError;
pub use scheduler::{Scheduler, SimState, StepPlan};
pub use session::{RngState, SessionSnapshot};
