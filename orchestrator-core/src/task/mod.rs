pub mod model;
pub mod registry;

pub use model::{
    HistoryEntry,
    Task,
    TaskStatus,
};
pub use registry::TaskRegistry;
