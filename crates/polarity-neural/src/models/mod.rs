pub mod bert_model;
pub mod lstm_model;

pub mod factory;
pub mod model_interface;
