pub mod codec;
pub mod dialogue;
pub mod lock;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;

pub use dialogue::{Completion, Outcome};
pub use request::Request;
pub use session::{SessionError, run_command};
pub use transport::Endpoint;
