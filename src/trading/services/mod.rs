pub mod credential_service;
pub mod skill_instance_service;
pub mod stop_watch_service;
