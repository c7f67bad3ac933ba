pub mod access;
pub mod blocks;
pub mod error;
pub mod logs;
pub mod plans;
pub mod sets;
