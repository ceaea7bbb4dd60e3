pub mod connection;

pub use connection::{
    accept,
    Connection,
    ConnectionHandle,
};
