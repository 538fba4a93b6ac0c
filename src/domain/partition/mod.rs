pub mod partition;
pub mod partitioner;
