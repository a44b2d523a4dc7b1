mod autostart;
mod lifecycle;
mod options;
mod status;
mod validate;
mod watch;

pub use autostart::run_autostart;
pub use lifecycle::{run_operation, Operation};
pub use options::{run_get_option, run_reset_option, run_set_option};
pub use status::{run_info, run_status};
pub use validate::run_validate;
pub use watch::run_watch;
