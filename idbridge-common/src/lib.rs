pub mod messages;
pub mod rpc;
pub mod types;

pub use messages::*;
pub use rpc::*;
pub use types::*;
