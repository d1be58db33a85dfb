pub mod search;
pub mod values;
