pub mod bond;
pub mod commitment;
pub mod nick;
pub mod offer;
pub mod orderbook;
pub mod peer;
pub mod podle;
pub mod selection;
pub mod session;
pub mod tx;
pub mod verifier;
