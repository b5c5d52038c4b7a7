pub mod encoder;
pub mod keys;
pub mod state;

pub use state::Recorder;
