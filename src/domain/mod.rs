pub mod auto_off;
pub mod power_delta;
pub mod scene;
pub mod switch_status;
