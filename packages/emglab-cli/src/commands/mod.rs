pub mod evaluate;
pub mod features;
pub mod inspect;
pub mod stats;
pub mod train;
