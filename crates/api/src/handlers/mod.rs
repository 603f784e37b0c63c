pub mod imu;
pub mod video;
