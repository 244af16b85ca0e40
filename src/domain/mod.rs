pub mod fortune;
pub mod luck;
