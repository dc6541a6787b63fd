pub mod skill_definition;
pub mod skill_instance;
