pub mod listen;
pub mod replay_info;
pub mod serve;

pub use listen::handle_listen;
pub use replay_info::handle_replay_info;
pub use serve::handle_serve;
