//! 流水线编排：Leaf handler、Sequential / Parallel 阶段、过程事件与 Turn Runner

pub mod events;
pub mod leaf;
pub mod runner;
pub mod spec;
pub mod stage;

pub use events::{EventPayload, PipelineEvent, TurnScope};
pub use leaf::{LeafBuilder, LeafHandler, LeafState, OutputContract, ViolationPolicy};
pub use runner::{TurnReply, TurnRunner, TurnStatus, APOLOGY_TEXT, CANCELLED_TEXT};
pub use spec::{HandlerOutcome, HandlerSpec};
pub use stage::{ParallelPolicy, ParallelStage, SequentialPolicy, SequentialStage};
