pub mod load;
pub mod plan;
