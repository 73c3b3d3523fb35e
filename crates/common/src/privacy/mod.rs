//! Privacy regulation signals carried in the bid request.
//!
//! - [`ccpa`]: US privacy consent string and no-sale bidder list

pub mod ccpa;

pub use ccpa::Policy;
