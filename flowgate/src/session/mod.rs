//! Node session layer
//!
//! One persistent WebSocket session per agent, with request/response
//! correlation over the push channel, optional AES-256-GCM payload
//! encryption, keep-alive, and a fanout set of operator subscribers
//! that receive status and telemetry pushes.

mod connection;
mod crypto;
mod handler;
mod messages;
mod registry;

pub use connection::NodeSession;
pub use crypto::{open_payload, CipherCache, EncryptedEnvelope, SecretCipher};
pub use handler::{session_endpoint, SessionQuery};
pub use messages::{AgentReply, InboundFrame, MessageType, OutboundFrame};
pub use registry::SessionRegistry;
