pub mod high_pass;

pub use high_pass::{HighPassFilter, HighPassStep, DEFAULT_BETA};
