pub mod execution_log;
pub mod stop_watch;
