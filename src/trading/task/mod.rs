pub mod skill_sweep;
pub mod stop_watch_sweep;
