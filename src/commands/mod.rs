mod config_cmd;
mod object;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use object::ObjectCommand;
pub use sync_cmd::SyncCommand;
