pub mod configuration_dto;
pub mod constraint_dto;
pub mod vjob_dto;
