pub mod config;
pub mod coupling;
pub mod integrator;
pub mod output;
pub mod phase;
pub mod sensitivities;
pub mod solution;
pub mod stage;
pub mod test_models;
pub mod time_grid;
pub mod time_marching;
pub mod vectorized_step;
