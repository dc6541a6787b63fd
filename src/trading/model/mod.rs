pub mod broker;
pub mod execution;
pub mod skill;
