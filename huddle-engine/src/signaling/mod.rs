mod channel_signaling;
mod signaling_output;

pub use channel_signaling::ChannelSignaling;
pub use signaling_output::SignalingOutput;
