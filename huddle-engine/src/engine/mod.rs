mod engine_command;
mod engine_handle;
mod mesh_engine;
mod notification;

pub use engine_command::{EngineCommand, EngineSnapshot};
pub use engine_handle::EngineHandle;
pub use mesh_engine::MeshEngine;
pub use notification::EngineNotification;
