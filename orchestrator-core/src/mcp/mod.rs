pub mod protocol;
pub mod supervisor;

pub use protocol::{
    ChildReply,
    ChildRequest,
    InterpreterKind,
    ToolDescriptor,
};
pub use supervisor::{
    McpServerStatus,
    McpServerSummary,
    McpSupervisor,
    SHUTDOWN_GRACE,
};
