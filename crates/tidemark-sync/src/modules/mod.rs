//! Resource modules shipped with Tidemark.

pub mod ec2;
