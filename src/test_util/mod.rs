pub mod gate;
pub mod link;
