pub mod response;

pub use response::{GeneratedResponse, MessageChunk};
