pub mod errors;
pub mod nexthop;
pub mod prefix_id;
pub mod route;
pub mod stats;
