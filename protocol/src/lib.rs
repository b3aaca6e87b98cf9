pub mod message;
pub mod model;
pub mod reasoning;
pub mod thread_id;
pub mod usage;

pub use message::Context;
pub use message::ContentPart;
pub use message::Message;
pub use message::Role;
pub use model::Model;
pub use model::ModelFamily;
pub use reasoning::ReasoningEffort;
pub use reasoning::ReasoningSummary;
pub use thread_id::SessionId;
pub use thread_id::ThreadId;
pub use usage::TokenUsage;
