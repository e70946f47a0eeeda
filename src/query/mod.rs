pub mod customer;
pub mod forwarder;
pub mod normalize;
