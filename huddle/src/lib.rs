pub use huddle_core::model::ParticipantId;

pub mod model {
    pub use huddle_core::model::*;
}

#[cfg(feature = "engine")]
pub mod engine {
    pub use huddle_engine::*;
}
