pub mod normalizer;
pub mod throttle;
pub mod window_buffer;
