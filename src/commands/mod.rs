pub mod health;
pub mod init_db;
pub mod run;
pub mod stats;

pub use health::handle_health;
pub use init_db::handle_init_db;
pub use run::handle_run;
pub use stats::handle_stats;
