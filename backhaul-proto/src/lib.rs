//! Wire messages for the backhaul reverse-tunnel protocol, along with the asynchronous codec
//! used to read and write them.
//!
//! The protocol borrows the shape of the SSH connection protocol's remote port forwarding
//! (RFC 4254, section 7): a client sends a `tcpip-forward` global request, the server answers
//! with the port it bound, and every connection accepted on that port is handed back to the
//! client as a `forwarded-tcpip` channel. What's carried over the secure transport is described
//! in [`messages`].

pub mod messages;
pub mod serialize;
