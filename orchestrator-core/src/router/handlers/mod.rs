pub mod agent_task;
pub mod client_task;
pub mod discovery;
pub mod disconnect;
pub mod liveness;
pub mod mcp;
pub mod notification;
pub mod registration;
pub mod service_task;
