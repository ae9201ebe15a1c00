pub mod stream_actor;

pub use stream_actor::{RunEvent, StreamActor};
