mod file_lock;
mod registry;

pub use file_lock::*;
pub use registry::*;

#[cfg(test)]
mod registry_test;
