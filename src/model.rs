pub mod dao;
pub mod error;
pub mod model;
pub mod rules;

pub use crate::model::dao::*;
pub use crate::model::error::*;
pub use crate::model::model::*;
pub use crate::model::rules::*;
