pub mod accrual;
pub mod amount;
pub mod config;
pub mod csv;
pub mod luhn;
pub mod model;
pub mod reconcile;
pub mod repository;
pub mod usecase;

pub use amount::Amount;
