pub mod compose;
pub mod master;
pub mod protocol;
pub mod task;

pub use compose::*;
pub use master::*;
pub use protocol::*;
pub use task::*;
