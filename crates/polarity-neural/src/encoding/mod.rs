pub mod vocab;
pub mod wordpiece;
