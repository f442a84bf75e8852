pub mod broadcast;
pub mod builder;
pub mod maker;
pub mod protocol;
pub mod schedule;
pub mod taker;
