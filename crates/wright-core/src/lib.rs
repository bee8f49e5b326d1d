//! Shared vocabulary for the wright agent runtime: identifiers, the
//! client-facing stream events, the internal bus events, tool and hook
//! contracts, and the collaborator traits the engine consumes.

pub mod errors;
pub mod events;
pub mod hooks;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod services;
pub mod stream;
pub mod tokens;
pub mod tools;
