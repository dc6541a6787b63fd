pub mod broker;
pub mod indicator;
pub mod market;
pub mod model;
pub mod services;
pub mod skill;
pub mod task;
