//! 核心层：错误与恢复、会话监管（turn 取消）、进程退出

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod shutdown;

pub use error::{PipelineError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{SessionSupervisor, TurnGuard};
pub use shutdown::Shutdown;
