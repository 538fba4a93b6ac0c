pub mod configuration;
pub mod node;
pub mod platform;
pub mod virtual_machine;
pub mod vm_builder;
