pub mod context;
pub mod handlers;
pub mod router;

pub use context::RouterContext;
pub use router::run;
