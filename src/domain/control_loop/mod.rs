pub mod control_loop;
pub mod control_loop_config;
pub mod control_loop_type;
pub mod driver;
pub mod executor;
pub mod monitor;
pub mod vjob;
pub mod vjob_queue;
