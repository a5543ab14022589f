pub mod archive;
pub mod cancel;
pub mod candidates;
pub mod coordinator;
pub mod file_ops;
pub mod guess;

#[cfg(test)]
pub(crate) mod fixtures;
