pub mod capture_control;
pub mod capture_facility;
pub mod chunk_observer;
pub mod clock;
