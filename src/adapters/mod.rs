pub mod api;
pub mod shelly_cloud;
pub mod shelly_debug_file;
pub mod shelly_rpc;
