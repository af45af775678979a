pub mod acquisition;
pub mod compression;
pub mod disk;
pub mod progress;
pub mod quota;
pub mod validation;
