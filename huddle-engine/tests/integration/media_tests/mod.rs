pub mod test_active_speaker;
pub mod test_camera_toggle;
pub mod test_device_failures;
pub mod test_screen_share;
