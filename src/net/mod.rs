//! # 混合 Petri 网核心定义
//!
//! 设库所集合 `P` 与变迁集合 `T`，弧集合 `A ⊆ (P×T) ∪ (T×P)`（二部不变式，
//! 构造期校验）。每条弧携带语义类别 `kind ∈ {Normal, Test, Inhibitor}` 与
//! 权重 `w > 0`。对标识 `M ∈ ℝ≥0^{|P|}`：
//!
//! * 输入弧 `(p, t)` **满足** 当且仅当：
//!   - Normal/Test: `M[p] ≥ w`；
//!   - Inhibitor: `M[p] < θ`，其中 `θ` 默认取 `w`；
//! * 变迁 `t` **可激发** 当且仅当其全部关联弧满足且守卫成立；
//! * 离散发射原子地施加全部 Normal 弧增量（`P→T` 减 `w`，`T→P` 加 `w`）；
//!   Test/Inhibitor 弧从不改变标识。
//!
//! 变迁按语义类别分为 Immediate / Timed / Stochastic / Continuous 四种，
//! 执行语义见 [`crate::sim`]。结构编辑（创建、删除、转型）通过
//! [`change::NetChange`] 同步发布给订阅者。
//!
//! ## 示例
//!
//! ```rust
//! use RustHPN::net::*;
//!
//! let mut net = Net::empty();
//! let p0 = net.add_place(Place::new("substrate", 2.0)).unwrap();
//! let p1 = net.add_place(Place::new("product", 0.0)).unwrap();
//! let t0 = net.add_transition(Transition::immediate("react")).unwrap();
//!
//! net.add_arc(NodeRef::Place(p0), NodeRef::Transition(t0), ArcKind::Normal, 1.0).unwrap();
//! net.add_arc(NodeRef::Transition(t0), NodeRef::Place(p1), ArcKind::Normal, 1.0).unwrap();
//!
//! let marking = net.initial_marking();
//! assert_eq!(marking.tokens(p0), 2.0);
//! ```

pub mod arena;
pub mod change;
pub mod core;
pub mod ids;
pub mod io;
pub mod structure;

pub use arena::{Arena, Idx, IndexVec};
pub use change::{EntityRef, NetChange, Subscribers};
pub use core::{MalformedArcError, Net, NetError, NodeRef};
pub use ids::{ArcId, PlaceId, TransitionId};
pub use io::IoError;
pub use structure::{
    Arc, ArcDirection, ArcKind, CustomGuard, CustomRate, Guard, Marking, Place, RateLaw, Tokens,
    Transition, TransitionKind,
};
