// Handlers module

pub mod generate;
pub mod status;
