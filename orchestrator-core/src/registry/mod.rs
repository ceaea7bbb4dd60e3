pub mod peer;
pub mod registry;

pub use peer::{
    PeerKind,
    PeerListFilters,
    PeerRecord,
    PeerStatus,
};
pub use registry::PeerRegistry;
