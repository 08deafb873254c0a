pub mod error;
pub mod message;
pub mod requests;
pub mod responses;


pub use error::{Result, RingrpcError};
pub use message::{MessageBody, MessageType, WireMessage, next_sequence};
pub use requests::{CallEnvelope, RequestId, ServiceKey};
pub use responses::{ResponseCode, ResultEnvelope};
