pub mod setfit_pipeline;
pub mod utils;
