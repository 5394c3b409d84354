pub mod exponential_decay;
pub mod forced_oscillator;
