pub mod cluster;
pub mod coordinator;
pub mod geo;
pub mod marker;
pub mod property;
pub mod tracker;
pub mod widget;
