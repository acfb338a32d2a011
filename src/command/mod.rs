mod export;
mod fingerprint;
mod serve;
mod verify;

pub use export::run_export;
pub use fingerprint::run_fingerprint;
pub use serve::run_serve;
pub use verify::run_verify;
